//! Tax office back-office system: declarations, registrations,
//! certificates, e-Factura and payments.

use crate::error::ServiceError;
use crate::models::InvoiceType;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReceiptStatus {
    Success,
    Error,
}

/// Answer of the office system to any request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfficeReceipt {
    pub status: ReceiptStatus,
    pub id: String,
    pub message: String,
}

impl OfficeReceipt {
    pub fn success(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: ReceiptStatus::Success,
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ReceiptStatus::Error,
            id: String::new(),
            message: message.into(),
        }
    }

    /// An `error` receipt becomes `ServiceError::Rejected`
    pub fn into_result(self) -> Result<Self, ServiceError> {
        match self.status {
            ReceiptStatus::Success => Ok(self),
            ReceiptStatus::Error => Err(ServiceError::Rejected(self.message)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RentalContract {
    pub property_address: String,
    pub start_date: String,
    pub end_date: String,
    pub monthly_rent: f64,
    pub landlord_cnp: Option<String>,
    pub tenant_cnp: Option<String>,
}

pub trait OfficeSystem: Send + Sync {
    fn submit_d212(
        &self,
        fiscal_year: i32,
        annual_income: f64,
        contributions: f64,
    ) -> Result<OfficeReceipt, ServiceError>;

    fn register_rental_contract(&self, contract: &RentalContract) -> Result<OfficeReceipt, ServiceError>;

    fn request_certificate(
        &self,
        identifier: &str,
        certificate_type: &str,
    ) -> Result<OfficeReceipt, ServiceError>;

    fn submit_invoice(
        &self,
        seller_cui: &str,
        invoice_xml: &str,
        invoice_type: InvoiceType,
    ) -> Result<OfficeReceipt, ServiceError>;

    fn invoice_status(&self, upload_index: &str) -> Result<OfficeReceipt, ServiceError>;

    fn process_payment(&self, amount: f64, reference: &str) -> Result<OfficeReceipt, ServiceError>;
}

/// In-process office system that accepts every well-formed request.
///
/// `unavailable` makes every call fail; `rejecting` answers with error
/// receipts instead. Calls are recorded for assertions.
#[derive(Default)]
pub struct MockOfficeSystem {
    unavailable: Option<String>,
    rejecting: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl MockOfficeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            unavailable: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            rejecting: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, call: &str) -> Result<(), ServiceError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(call.to_string());
        debug!(call, "office system call");

        match &self.unavailable {
            Some(reason) => Err(ServiceError::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }

    fn answer(&self, id: String, message: String) -> OfficeReceipt {
        match &self.rejecting {
            Some(reason) => OfficeReceipt::error(reason.clone()),
            None => OfficeReceipt::success(id, message),
        }
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..6].to_uppercase()
}

impl OfficeSystem for MockOfficeSystem {
    fn submit_d212(
        &self,
        fiscal_year: i32,
        annual_income: f64,
        _contributions: f64,
    ) -> Result<OfficeReceipt, ServiceError> {
        self.record("submit_d212")?;
        if annual_income < 0.0 {
            return Err(ServiceError::InvalidInput("declared income is negative".to_string()));
        }
        Ok(self.answer(
            format!("D212-{}-{}", fiscal_year, short_id()),
            format!("D212 declaration for {} submitted", fiscal_year),
        ))
    }

    fn register_rental_contract(&self, contract: &RentalContract) -> Result<OfficeReceipt, ServiceError> {
        self.record("register_rental_contract")?;
        if contract.property_address.trim().is_empty() {
            return Err(ServiceError::InvalidInput("property address is required".to_string()));
        }
        Ok(self.answer(
            format!("RC-{}-{}", Utc::now().year(), short_id()),
            format!("Rental contract for {} registered", contract.property_address),
        ))
    }

    fn request_certificate(
        &self,
        _identifier: &str,
        certificate_type: &str,
    ) -> Result<OfficeReceipt, ServiceError> {
        self.record("request_certificate")?;
        Ok(self.answer(
            format!("CERT-{}-{}", Utc::now().year(), short_id()),
            format!("Certificate request ({}) registered", certificate_type),
        ))
    }

    fn submit_invoice(
        &self,
        _seller_cui: &str,
        invoice_xml: &str,
        invoice_type: InvoiceType,
    ) -> Result<OfficeReceipt, ServiceError> {
        self.record("submit_invoice")?;
        if invoice_xml.trim().is_empty() {
            return Err(ServiceError::InvalidInput("invoice XML is empty".to_string()));
        }
        let kind = match invoice_type {
            InvoiceType::B2b => "B2B",
            InvoiceType::B2c => "B2C",
        };
        Ok(self.answer(
            (5_000_000_000u64 + u64::from(Uuid::new_v4().as_fields().0 % 1_000_000)).to_string(),
            format!("{} invoice uploaded to e-Factura", kind),
        ))
    }

    fn invoice_status(&self, upload_index: &str) -> Result<OfficeReceipt, ServiceError> {
        self.record("invoice_status")?;
        Ok(self.answer(upload_index.to_string(), "Invoice processed: ok".to_string()))
    }

    fn process_payment(&self, amount: f64, reference: &str) -> Result<OfficeReceipt, ServiceError> {
        self.record("process_payment")?;
        if amount.is_nan() || amount <= 0.0 {
            return Err(ServiceError::InvalidInput(format!("payment amount must be positive, got {}", amount)));
        }
        Ok(self.answer(
            format!("GH-PAY-{}", Utc::now().format("%Y%m%d%H%M%S")),
            format!("Payment of {:.2} RON for {} initiated", amount, reference),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_accepts_and_records() {
        let office = MockOfficeSystem::new();
        let receipt = office.submit_d212(2024, 150000.0, 11880.0).unwrap();

        assert_eq!(receipt.status, ReceiptStatus::Success);
        assert!(receipt.id.starts_with("D212-2024-"));
        assert_eq!(office.calls(), vec!["submit_d212".to_string()]);
    }

    #[test]
    fn test_unavailable_mock_fails_every_call() {
        let office = MockOfficeSystem::unavailable("maintenance");
        let result = office.request_certificate("1800101221144", "atestare fiscala");
        assert_eq!(result, Err(ServiceError::Unavailable("maintenance".to_string())));
    }

    #[test]
    fn test_rejecting_mock_returns_error_receipt() {
        let office = MockOfficeSystem::rejecting("duplicate declaration");
        let receipt = office.submit_d212(2024, 1.0, 0.0).unwrap();
        assert_eq!(receipt.status, ReceiptStatus::Error);
        assert_eq!(
            receipt.into_result(),
            Err(ServiceError::Rejected("duplicate declaration".to_string()))
        );
    }

    #[test]
    fn test_payment_requires_positive_amount() {
        let office = MockOfficeSystem::new();
        assert!(office.process_payment(0.0, "property-sale").is_err());
        assert!(office.process_payment(1000.0, "property-sale").is_ok());
    }
}
