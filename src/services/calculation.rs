//! Tax calculation service
//!
//! Pure functions of their inputs and the configured [`TaxRates`].
//! Amounts are in RON and rounded to cents.

use crate::config::TaxRates;
use crate::error::ServiceError;
use crate::services::round_cents;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PfaContributions {
    pub annual_income: f64,
    pub minimum_salary: f64,
    /// 12 minimum salaries
    pub cas_threshold: f64,
    /// 6 minimum salaries
    pub cass_threshold: f64,
    pub cas_amount: f64,
    pub cass_amount: f64,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertySaleTax {
    pub property_value: f64,
    pub ownership_years: u32,
    pub tax_rate: f64,
    pub tax: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RentalIncomeTax {
    pub monthly_rent: f64,
    pub annual_rent: f64,
    pub tax_rate: f64,
    pub tax: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CalculationService {
    rates: TaxRates,
}

impl CalculationService {
    pub fn new(rates: TaxRates) -> Self {
        Self { rates }
    }

    pub fn rates(&self) -> &TaxRates {
        &self.rates
    }

    /// CAS and CASS owed by a PFA.
    ///
    /// Each contribution is due only once income reaches its threshold and
    /// is computed on the threshold, not on the income itself.
    pub fn pfa_contributions(&self, annual_income: f64) -> Result<PfaContributions, ServiceError> {
        ensure_amount("annual income", annual_income)?;

        let minimum_salary = self.rates.minimum_gross_salary;
        let cas_threshold = minimum_salary * 12.0;
        let cass_threshold = minimum_salary * 6.0;

        let cas_amount = if annual_income >= cas_threshold {
            round_cents(cas_threshold * self.rates.cas_rate)
        } else {
            0.0
        };

        let cass_amount = if annual_income >= cass_threshold {
            round_cents(cass_threshold * self.rates.cass_rate)
        } else {
            0.0
        };

        Ok(PfaContributions {
            annual_income,
            minimum_salary,
            cas_threshold,
            cass_threshold,
            cas_amount,
            cass_amount,
            total: round_cents(cas_amount + cass_amount),
        })
    }

    /// Tax on a property sale. The long-ownership rate applies from
    /// `long_ownership_years` inclusive.
    pub fn property_sale_tax(
        &self,
        property_value: f64,
        ownership_years: u32,
    ) -> Result<PropertySaleTax, ServiceError> {
        ensure_amount("property value", property_value)?;

        let tax_rate = if ownership_years >= self.rates.long_ownership_years {
            self.rates.property_tax_rate_long
        } else {
            self.rates.property_tax_rate_short
        };

        Ok(PropertySaleTax {
            property_value,
            ownership_years,
            tax_rate,
            tax: round_cents(property_value * tax_rate),
        })
    }

    pub fn rental_income_tax(&self, monthly_rent: f64) -> Result<RentalIncomeTax, ServiceError> {
        ensure_amount("monthly rent", monthly_rent)?;

        let annual_rent = round_cents(monthly_rent * 12.0);
        let tax_rate = self.rates.rental_tax_rate;

        Ok(RentalIncomeTax {
            monthly_rent,
            annual_rent,
            tax_rate,
            tax: round_cents(annual_rent * tax_rate),
        })
    }
}

fn ensure_amount(label: &str, amount: f64) -> Result<(), ServiceError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ServiceError::InvalidInput(format!(
            "{} must be a non-negative amount, got {}",
            label, amount
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> CalculationService {
        CalculationService::new(TaxRates::default())
    }

    #[test]
    fn test_pfa_above_both_thresholds() {
        let result = service().pfa_contributions(150000.0).unwrap();
        assert_eq!(result.cas_threshold, 39600.0);
        assert_eq!(result.cass_threshold, 19800.0);
        assert_eq!(result.cas_amount, 9900.0);
        assert_eq!(result.cass_amount, 1980.0);
        assert_eq!(result.total, 11880.0);
    }

    #[test]
    fn test_pfa_between_thresholds_owes_cass_only() {
        let result = service().pfa_contributions(25000.0).unwrap();
        assert_eq!(result.cas_amount, 0.0);
        assert_eq!(result.cass_amount, 1980.0);
    }

    #[test]
    fn test_pfa_threshold_is_inclusive() {
        let result = service().pfa_contributions(39600.0).unwrap();
        assert_eq!(result.cas_amount, 9900.0);

        let below = service().pfa_contributions(19799.99).unwrap();
        assert_eq!(below.total, 0.0);
    }

    #[test]
    fn test_property_three_years_uses_long_rate() {
        let result = service().property_sale_tax(100000.0, 3).unwrap();
        assert_eq!(result.tax_rate, 0.01);
        assert_eq!(result.tax, 1000.0);

        let short = service().property_sale_tax(100000.0, 2).unwrap();
        assert_eq!(short.tax_rate, 0.03);
        assert_eq!(short.tax, 3000.0);
    }

    #[test]
    fn test_rental_income_tax() {
        let result = service().rental_income_tax(2500.0).unwrap();
        assert_eq!(result.annual_rent, 30000.0);
        assert_eq!(result.tax, 3000.0);
    }

    #[test]
    fn test_negative_or_nan_amounts_are_rejected() {
        assert!(matches!(
            service().pfa_contributions(-1.0),
            Err(ServiceError::InvalidInput(_))
        ));
        assert!(service().rental_income_tax(f64::NAN).is_err());
        assert!(service().property_sale_tax(f64::INFINITY, 5).is_err());
    }
}
