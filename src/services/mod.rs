//! Domain services consumed by handlers
//!
//! All services are synchronous and return `ServiceError` on failure;
//! handlers turn those failures into error updates.

pub mod calculation;
pub mod documents;
pub mod office;
pub mod validators;

pub use calculation::{CalculationService, PfaContributions, PropertySaleTax, RentalIncomeTax};
pub use documents::{DocumentExtractor, DocumentFields, DocumentType, ExtractedDocument, MockDocumentExtractor};
pub use office::{
    MockOfficeSystem, OfficeReceipt, OfficeSystem, ReceiptStatus, RentalContract,
};
pub use validators::{validate_cnp, validate_cnp_or_cui, validate_cui};

/// Round a currency amount to cents.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// `1234567.5` → `"1,234,567.50"`
pub fn format_ron(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, ch) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}{}.{:02}", sign, grouped, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ron_groups_thousands() {
        assert_eq!(format_ron(9900.0), "9,900.00");
        assert_eq!(format_ron(1234567.5), "1,234,567.50");
        assert_eq!(format_ron(0.0), "0.00");
        assert_eq!(format_ron(-42.129), "-42.13");
    }

    #[test]
    fn test_round_cents() {
        assert_eq!(round_cents(19800.0 * 0.10), 1980.0);
        assert_eq!(round_cents(0.125), 0.13);
    }
}
