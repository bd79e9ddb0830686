//! Fiscal vocabulary shared by every document the engine issues.

use serde::{Deserialize, Serialize};
use std::fmt;

/// RFC placeholder for anonymous domestic buyers.
pub const PUBLIC_GENERAL_RFC: &str = "XAXX010101000";

/// RFC placeholder for anonymous foreign buyers.
pub const FOREIGN_PUBLIC_GENERAL_RFC: &str = "XEXX010101000";

/// Whether a receiver RFC is one of the recognized "general public" placeholders.
pub fn is_public_general_rfc(rfc: &str) -> bool {
    let rfc = rfc.trim();
    rfc.eq_ignore_ascii_case(PUBLIC_GENERAL_RFC) || rfc.eq_ignore_ascii_case(FOREIGN_PUBLIC_GENERAL_RFC)
}

/// CFDI voucher type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CfdiType {
    #[serde(rename = "I")]
    Ingreso,
    #[serde(rename = "E")]
    Egreso,
    #[serde(rename = "T")]
    Traslado,
    #[serde(rename = "P")]
    Pago,
}

impl CfdiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CfdiType::Ingreso => "I",
            CfdiType::Egreso => "E",
            CfdiType::Traslado => "T",
            CfdiType::Pago => "P",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "I" => Some(CfdiType::Ingreso),
            "E" => Some(CfdiType::Egreso),
            "T" => Some(CfdiType::Traslado),
            "P" => Some(CfdiType::Pago),
            _ => None,
        }
    }
}

impl fmt::Display for CfdiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment method: paid at issuance (PUE) or deferred (PPD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Pue,
    Ppd,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pue => "PUE",
            PaymentMethod::Ppd => "PPD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PUE" => Some(PaymentMethod::Pue),
            "PPD" => Some(PaymentMethod::Ppd),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Two-digit SAT payment form code ("01" cash, "03" transfer, "99" to be defined, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PaymentForm(String);

impl PaymentForm {
    /// "Por definir": mandatory for deferred-payment invoices.
    pub const TO_BE_DEFINED: &'static str = "99";

    pub fn new(code: impl Into<String>) -> Result<Self, String> {
        let code = code.into();
        if code.len() == 2 && code.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(code))
        } else {
            Err(format!("invalid payment form code '{}'", code))
        }
    }

    pub fn to_be_defined() -> Self {
        Self(Self::TO_BE_DEFINED.to_string())
    }

    pub fn is_to_be_defined(&self) -> bool {
        self.0 == Self::TO_BE_DEFINED
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PaymentForm {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PaymentForm::new(value)
    }
}

impl From<PaymentForm> for String {
    fn from(value: PaymentForm) -> Self {
        value.0
    }
}

impl fmt::Display for PaymentForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authority-defined cancellation motive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CancellationMotive {
    /// "01": issued with errors, replaced by a related invoice.
    #[serde(rename = "01")]
    ErrorsWithRelation,
    /// "02": issued with errors, no relation required.
    #[serde(rename = "02")]
    #[default]
    ErrorsWithoutRelation,
    /// "03": the operation did not take place.
    #[serde(rename = "03")]
    NotCarriedOut,
    /// "04": nominative operation included in a global invoice.
    #[serde(rename = "04")]
    NominativeInGlobal,
}

impl CancellationMotive {
    pub fn code(&self) -> &'static str {
        match self {
            CancellationMotive::ErrorsWithRelation => "01",
            CancellationMotive::ErrorsWithoutRelation => "02",
            CancellationMotive::NotCarriedOut => "03",
            CancellationMotive::NominativeInGlobal => "04",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "01" => Some(CancellationMotive::ErrorsWithRelation),
            "02" => Some(CancellationMotive::ErrorsWithoutRelation),
            "03" => Some(CancellationMotive::NotCarriedOut),
            "04" => Some(CancellationMotive::NominativeInGlobal),
            _ => None,
        }
    }

    pub fn requires_replacement(&self) -> bool {
        matches!(self, CancellationMotive::ErrorsWithRelation)
    }
}

/// Transferred tax kinds the compiler knows how to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxKind {
    Iva,
    Ieps,
}

impl TaxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxKind::Iva => "IVA",
            TaxKind::Ieps => "IEPS",
        }
    }
}
