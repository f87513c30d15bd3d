//! Shape checks for procedure and diagnosis codes.
//!
//! Procedure codes come in four shapes:
//!
//! - CPT Category I: five digits (`29826`)
//! - HCPCS Level II: a letter `A`..`V` followed by four digits (`G0289`)
//! - CPT Category III: four digits followed by a letter (`0275T`)
//! - Ranges: `RANGE_<start>_<end>` with two five-digit endpoints, `start <= end`
//!
//! Diagnosis codes follow ICD-10 layout: one uppercase letter, two digits,
//! and an optional `.` with one to four digits (`C50`, `C50.011`).

const RANGE_PREFIX: &str = "RANGE_";

/// True for a five-digit CPT code.
pub fn is_cpt(code: &str) -> bool {
    code.len() == 5 && code.bytes().all(|b| b.is_ascii_digit())
}

/// True for an HCPCS Level II code (`A0000`..`V9999`).
pub fn is_hcpcs(code: &str) -> bool {
    let b = code.as_bytes();
    b.len() == 5 && (b'A'..=b'V').contains(&b[0]) && b[1..].iter().all(u8::is_ascii_digit)
}

/// True for a CPT Category III code (`0275T`).
pub fn is_category_iii(code: &str) -> bool {
    let b = code.as_bytes();
    b.len() == 5 && b[..4].iter().all(u8::is_ascii_digit) && b[4].is_ascii_uppercase()
}

/// Any procedure code shape accepted on a rule, including range tokens.
pub fn is_valid_procedure_code(code: &str) -> bool {
    is_cpt(code) || is_hcpcs(code) || is_category_iii(code) || parse_range(code).is_some()
}

/// True for an ICD-10 style diagnosis code.
pub fn is_valid_diagnosis_code(code: &str) -> bool {
    let b = code.as_bytes();
    if b.len() < 3 || !b[0].is_ascii_uppercase() || !b[1].is_ascii_digit() || !b[2].is_ascii_digit()
    {
        return false;
    }
    match &b[3..] {
        [] => true,
        [b'.', rest @ ..] => (1..=4).contains(&rest.len()) && rest.iter().all(u8::is_ascii_digit),
        _ => false,
    }
}

/// Build the token for an inclusive numeric code range.
pub fn range_token(start: &str, end: &str) -> String {
    format!("{RANGE_PREFIX}{start}_{end}")
}

/// Parse a `RANGE_<start>_<end>` token into its numeric bounds.
///
/// Returns `None` when the endpoints are not five-digit codes or are reversed.
pub fn parse_range(token: &str) -> Option<(u32, u32)> {
    let rest = token.strip_prefix(RANGE_PREFIX)?;
    let (start, end) = rest.split_once('_')?;
    if !is_cpt(start) || !is_cpt(end) {
        return None;
    }
    let (s, e) = (start.parse().ok()?, end.parse().ok()?);
    (s <= e).then_some((s, e))
}

/// Does a rule's procedure token cover the queried code?
///
/// Literal tokens match exactly. Range tokens match any five-digit code
/// inside the inclusive bounds.
pub fn token_matches(token: &str, code: &str) -> bool {
    if token == code {
        return true;
    }
    match parse_range(token) {
        Some((start, end)) if is_cpt(code) => code
            .parse::<u32>()
            .is_ok_and(|n| (start..=end).contains(&n)),
        _ => false,
    }
}
