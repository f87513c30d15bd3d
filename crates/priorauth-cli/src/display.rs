//! Vertical card display for authorization rules and evaluation results.
//!
//! Renders one rule as a grouped, human-readable card. Empty groups are
//! skipped, and long code lists are cut off after [`MAX_LIST_ITEMS`].

use std::collections::BTreeSet;

use priorauth_core::Rule;
use priorauth_engine::EvaluationResult;

const MAX_LIST_ITEMS: usize = 10;

// ── Public API ──

/// Print a single rule as a vertical card grouped by concern.
pub fn print_rule_card(rule: &Rule) {
    println!("=== {} ===", rule.rule_id);
    let heading: Vec<&str> = [rule.category.as_deref(), rule.service.as_deref()]
        .into_iter()
        .flatten()
        .collect();
    if !heading.is_empty() {
        println!("{}", heading.join(" > "));
    }
    println!();

    print_section(
        "Identity",
        &[
            ("payer", Some(rule.payer.clone())),
            ("rule_type", Some(rule.rule_type.as_str().to_string())),
            ("auth_requirement", Some(rule.auth_requirement.to_string())),
            ("confidence", Some(format!("{:.2}", rule.confidence))),
        ],
    );
    print_section(
        "Codes",
        &[
            ("procedure_codes", join_capped(&rule.procedure_codes)),
            ("diagnosis_codes", join_capped(&rule.diagnosis_codes)),
        ],
    );
    print_section(
        "Geography",
        &[
            ("excluded_states", join_capped(&rule.excluded_states)),
            ("included_states", join_capped(&rule.included_states)),
            ("applicable_plans", join_capped(&rule.applicable_plans)),
        ],
    );
    print_conditional(rule);
    print_qualifiers(rule);
    print_section(
        "Narrative",
        &[
            ("clinical_criteria", join_vec(&rule.clinical_criteria)),
            ("quantity_limits", join_vec(&rule.quantity_limits)),
            (
                "needs_review",
                rule.needs_narrative_review.then(|| "yes".to_string()),
            ),
            ("text", rule.narrative_text.as_deref().map(shorten)),
        ],
    );
    print_section(
        "Provenance",
        &[
            ("file", non_empty(&rule.source.file)),
            ("page", Some(rule.source.page.to_string())),
            ("line", Some(rule.source.line.to_string())),
            ("extracted_at", non_empty(&rule.extracted_at)),
        ],
    );
}

/// One line per rule: id, requirement, codes, and heading.
pub fn print_rule_summary(rules: &[Rule]) {
    println!("  {:<16} {:<18} {:<6} {}", "rule_id", "requirement", "codes", "category");
    for rule in rules {
        println!(
            "  {:<16} {:<18} {:<6} {}",
            rule.rule_id,
            rule.auth_requirement,
            rule.procedure_codes.len() + rule.diagnosis_codes.len(),
            rule.category.as_deref().unwrap_or("-")
        );
    }
}

pub fn print_evaluation(result: &EvaluationResult) {
    println!("Decision");
    println!(
        "  {:<26} {}",
        "auth_required",
        if result.auth_required { "yes" } else { "no" }
    );
    println!("  {:<26} {}", "auth_requirement", result.auth_requirement);
    println!("  {:<26} {:.2}", "confidence", result.confidence);
    println!("  {:<26} {}", "primary_reason", result.primary_reason);
    if !result.matched_rules.is_empty() {
        println!("  {:<26} {}", "matched_rules", result.matched_rules.join(", "));
    }
    println!();
    println!("Reasoning");
    for step in &result.reasoning_trail {
        println!("  - {step}");
    }
}

// ── Section rendering ──

fn print_section(header: &str, fields: &[(&str, Option<String>)]) {
    if fields.iter().all(|(_, v)| v.is_none()) {
        return;
    }
    println!("{header}");
    for (name, value) in fields {
        if let Some(value) = value {
            println!("  {:<26} {}", name, value);
        }
    }
    println!();
}

fn print_conditional(rule: &Rule) {
    if rule.conditional_logic.is_empty() {
        return;
    }
    println!("Conditional Logic ({}):", rule.conditional_logic.len());
    for logic in &rule.conditional_logic {
        println!(
            "    {} except {}",
            logic.result_auth_requirement,
            join_capped(&logic.excluded_states).unwrap_or_default()
        );
    }
    println!();
}

fn print_qualifiers(rule: &Rule) {
    let total = rule.place_of_service_rules.len()
        + rule.diagnosis_exceptions.len()
        + rule.age_restrictions.len();
    if total == 0 {
        return;
    }
    println!("Qualifiers");
    for pos in &rule.place_of_service_rules {
        print!("    place_of_service: {:<6}", pos.code);
        print!("  requires_auth: {}", if pos.requires_auth { "yes" } else { "no" });
        if !pos.description.is_empty() {
            print!("  ({})", pos.description);
        }
        println!();
    }
    for exception in &rule.diagnosis_exceptions {
        print!(
            "    diagnosis_exempt: {}",
            join_capped(&exception.codes).unwrap_or_default()
        );
        if !exception.description.is_empty() {
            print!("  ({})", shorten(&exception.description));
        }
        println!();
    }
    for age in &rule.age_restrictions {
        let bound = |b: Option<u32>| b.map_or_else(|| "-".to_string(), |v| v.to_string());
        println!(
            "    age: {} to {}  -> {}",
            bound(age.min_age),
            bound(age.max_age),
            age.auth_requirement
        );
    }
    println!();
}

// ── Helpers ──

fn join_capped(items: &BTreeSet<String>) -> Option<String> {
    if items.is_empty() {
        return None;
    }
    let shown: Vec<&str> = items.iter().take(MAX_LIST_ITEMS).map(String::as_str).collect();
    let mut out = shown.join(", ");
    if items.len() > MAX_LIST_ITEMS {
        out.push_str(&format!(" ... and {} more", items.len() - MAX_LIST_ITEMS));
    }
    Some(out)
}

fn join_vec(items: &[String]) -> Option<String> {
    (!items.is_empty()).then(|| items.join("; "))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

fn shorten(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 60 {
        let head: String = flat.chars().take(57).collect();
        format!("{head}...")
    } else {
        flat
    }
}
