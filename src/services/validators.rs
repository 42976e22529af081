//! Checksum validation for Romanian taxpayer identifiers.

const CNP_WEIGHTS: [u32; 12] = [2, 7, 9, 1, 4, 6, 3, 5, 8, 2, 7, 9];
const CUI_WEIGHTS: [u32; 9] = [7, 5, 3, 2, 1, 7, 5, 3, 2];

fn digits(raw: &str) -> Option<Vec<u32>> {
    raw.chars().map(|c| c.to_digit(10)).collect()
}

/// Personal numeric code: 13 digits, weighted checksum mod 11 (10 → 1).
pub fn validate_cnp(cnp: &str) -> bool {
    let cnp = cnp.trim();
    if cnp.len() != 13 {
        return false;
    }
    let Some(d) = digits(cnp) else {
        return false;
    };

    let sum: u32 = d.iter().zip(CNP_WEIGHTS.iter()).map(|(a, w)| a * w).sum();
    let expected = match sum % 11 {
        10 => 1,
        r => r,
    };

    d[12] == expected
}

/// Company code: 2-10 digits, optional `RO` prefix, weighted checksum
/// ×10 mod 11 (10 → 0).
pub fn validate_cui(cui: &str) -> bool {
    let trimmed = cui.trim();
    let upper = trimmed.to_uppercase();
    let bare = upper.strip_prefix("RO").unwrap_or(&upper).trim();

    if !(2..=10).contains(&bare.len()) {
        return false;
    }
    let Some(d) = digits(bare) else {
        return false;
    };

    let mut padded = vec![0u32; 10 - d.len()];
    padded.extend(d);

    let sum: u32 = padded.iter().zip(CUI_WEIGHTS.iter()).map(|(a, w)| a * w).sum();
    let expected = match (sum * 10) % 11 {
        10 => 0,
        r => r,
    };

    padded[9] == expected
}

/// Accept either identifier kind
pub fn validate_cnp_or_cui(identifier: &str) -> bool {
    validate_cnp(identifier) || validate_cui(identifier)
}
