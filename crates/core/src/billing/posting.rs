//! Validated construction of period postings.
//!
//! Nothing here touches the store. The service loads the period, builds the
//! posting with these functions, recomputes totals and commits both.

use chrono::{DateTime, NaiveDate, Utc};

use carehome_shared::types::{
    BillingPeriodId, ChargeId, CodePrefix, ContractId, DocumentCode, Money, OrganizationId,
    PatientExpenseId, PaymentId, UserId,
};

use super::error::BillingError;
use super::types::{
    BillingPeriod, CarriedDebt, Charge, ChargeType, PatientExpense, Payment, PaymentMethod,
    PaymentStatus, PeriodStatus, PostCharge, PostExpense,
};

/// Fails unless the period accepts optional charges.
///
/// ACTIVE periods always do. OVERDUE periods do only when
/// `overdue_accepts_charges` is set.
pub fn ensure_accepts_charges(
    period: &BillingPeriod,
    overdue_accepts_charges: bool,
) -> Result<(), BillingError> {
    match period.status {
        PeriodStatus::Active => Ok(()),
        PeriodStatus::Overdue if overdue_accepts_charges => Ok(()),
        status => Err(BillingError::PeriodClosed {
            period_id: period.id,
            status,
            posting: "charges",
        }),
    }
}

/// Fails if the period is SETTLED.
pub fn ensure_accepts(period: &BillingPeriod, posting: &'static str) -> Result<(), BillingError> {
    if period.status.accepts_postings() {
        Ok(())
    } else {
        Err(BillingError::PeriodClosed {
            period_id: period.id,
            status: period.status,
            posting,
        })
    }
}

fn positive(amount: Money) -> Result<Money, BillingError> {
    if !amount.is_positive() {
        return Err(BillingError::NonPositiveAmount(amount));
    }
    if !amount.in_range() {
        return Err(BillingError::AmountOverflow("posting amount"));
    }
    Ok(amount)
}

/// Builds a user-posted optional charge line.
pub fn charge_line(
    input: &PostCharge,
    recorded_by: UserId,
    now: DateTime<Utc>,
) -> Result<Charge, BillingError> {
    if input.charge_type.is_system() {
        return Err(BillingError::ReservedChargeType(input.charge_type));
    }
    if input.quantity == 0 {
        return Err(BillingError::InvalidInput(
            "charge quantity must be at least 1".into(),
        ));
    }
    positive(input.unit_price)?;
    let amount = input
        .unit_price
        .checked_mul(input.quantity)
        .ok_or(BillingError::AmountOverflow("charge amount"))?;

    Ok(Charge {
        id: ChargeId::new(),
        period_id: input.period_id,
        code: DocumentCode::generate(CodePrefix::Charge, input.date),
        charge_type: input.charge_type,
        description: input.description.clone(),
        amount: positive(amount)?,
        quantity: input.quantity,
        unit_price: input.unit_price,
        date: input.date,
        is_mandatory: false,
        carried_from: None,
        recorded_by,
        created_at: now,
    })
}

/// Mandatory nursing charge posted when a period opens.
pub fn nursing_line(
    period: &BillingPeriod,
    amount: Money,
    recorded_by: UserId,
    now: DateTime<Utc>,
) -> Result<Charge, BillingError> {
    let amount = positive(amount)?;
    Ok(Charge {
        id: ChargeId::new(),
        period_id: period.id,
        code: DocumentCode::generate(CodePrefix::Charge, period.start_date),
        charge_type: ChargeType::Nursing,
        description: format!("Nursing charge {:04}-{:02}", period.year, period.month),
        amount,
        quantity: 1,
        unit_price: amount,
        date: period.start_date,
        is_mandatory: true,
        carried_from: None,
        recorded_by,
        created_at: now,
    })
}

/// Carried-debt line, kept separate so the ledger stays traceable.
pub fn carried_line(
    period: &BillingPeriod,
    debt: &CarriedDebt,
    recorded_by: UserId,
    now: DateTime<Utc>,
) -> Result<Charge, BillingError> {
    let amount = positive(debt.amount)?;
    Ok(Charge {
        id: ChargeId::new(),
        period_id: period.id,
        code: DocumentCode::generate(CodePrefix::Charge, period.start_date),
        charge_type: ChargeType::CarriedDebt,
        description: debt.description.clone(),
        amount,
        quantity: 1,
        unit_price: amount,
        date: period.start_date,
        is_mandatory: false,
        carried_from: debt.from_period,
        recorded_by,
        created_at: now,
    })
}

/// Builds a patient expense.
pub fn expense_line(
    input: &PostExpense,
    recorded_by: UserId,
    now: DateTime<Utc>,
) -> Result<PatientExpense, BillingError> {
    if input.category.trim().is_empty() {
        return Err(BillingError::InvalidInput(
            "expense category is required".into(),
        ));
    }
    Ok(PatientExpense {
        id: PatientExpenseId::new(),
        period_id: input.period_id,
        code: DocumentCode::generate(CodePrefix::PatientExpense, input.date),
        category: input.category.clone(),
        description: input.description.clone(),
        amount: positive(input.amount)?,
        payment_method: input.payment_method,
        date: input.date,
        receipt: input.receipt.clone(),
        recorded_by,
        created_at: now,
    })
}

/// Payment details shared by regular and opening payments.
#[derive(Debug, Clone)]
pub struct PaymentDraft {
    /// Organization.
    pub organization_id: OrganizationId,
    /// Contract.
    pub contract_id: ContractId,
    /// Target period.
    pub period_id: BillingPeriodId,
    /// Amount.
    pub amount: Money,
    /// Method.
    pub method: PaymentMethod,
    /// Transfer reference.
    pub bank_reference: Option<String>,
    /// Payer.
    pub payer_name: String,
    /// Payment date.
    pub date: NaiveDate,
}

/// Builds a payment. Cash is verified on receipt by the receiving user;
/// bank transfers start PENDING and need a reference.
pub fn payment(
    draft: PaymentDraft,
    received_by: UserId,
    now: DateTime<Utc>,
) -> Result<Payment, BillingError> {
    let amount = positive(draft.amount)?;
    let bank_reference = draft
        .bank_reference
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    let (status, verified_by, verified_at) = match draft.method {
        PaymentMethod::Cash => (PaymentStatus::Verified, Some(received_by), Some(now)),
        PaymentMethod::BankTransfer => {
            if bank_reference.is_none() {
                return Err(BillingError::MissingBankReference);
            }
            (PaymentStatus::Pending, None, None)
        }
    };

    Ok(Payment {
        id: PaymentId::new(),
        organization_id: draft.organization_id,
        contract_id: draft.contract_id,
        period_id: draft.period_id,
        code: DocumentCode::generate(CodePrefix::Payment, draft.date),
        amount,
        method: draft.method,
        bank_reference,
        payer_name: draft.payer_name,
        date: draft.date,
        status,
        received_by,
        verified_by,
        verified_at,
        rejection_reason: None,
        created_at: now,
        version: 0,
    })
}

/// PENDING -> VERIFIED.
pub fn verify(
    payment: &Payment,
    verifier: UserId,
    now: DateTime<Utc>,
) -> Result<Payment, BillingError> {
    ensure_pending(payment)?;
    let mut verified = payment.clone();
    verified.status = PaymentStatus::Verified;
    verified.verified_by = Some(verifier);
    verified.verified_at = Some(now);
    Ok(verified)
}

/// PENDING -> REJECTED. The balance is never touched.
pub fn reject(
    payment: &Payment,
    verifier: UserId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Payment, BillingError> {
    ensure_pending(payment)?;
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(BillingError::InvalidInput(
            "a rejection reason is required".into(),
        ));
    }
    let mut rejected = payment.clone();
    rejected.status = PaymentStatus::Rejected;
    rejected.verified_by = Some(verifier);
    rejected.verified_at = Some(now);
    rejected.rejection_reason = Some(reason.to_string());
    Ok(rejected)
}

fn ensure_pending(payment: &Payment) -> Result<(), BillingError> {
    if payment.status == PaymentStatus::Pending {
        Ok(())
    } else {
        Err(BillingError::PaymentNotPending {
            payment_id: payment.id,
            status: payment.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 5).unwrap()
    }

    fn draft(method: PaymentMethod, amount: i64, reference: Option<&str>) -> PaymentDraft {
        PaymentDraft {
            organization_id: OrganizationId::new(),
            contract_id: ContractId::new(),
            period_id: BillingPeriodId::new(),
            amount: Money::new(amount),
            method,
            bank_reference: reference.map(str::to_string),
            payer_name: "Family".into(),
            date: date(),
        }
    }

    fn charge(charge_type: ChargeType, quantity: u32, unit_price: i64) -> PostCharge {
        PostCharge {
            period_id: BillingPeriodId::new(),
            charge_type,
            description: "Visit".into(),
            quantity,
            unit_price: Money::new(unit_price),
            date: date(),
        }
    }

    #[test]
    fn test_charge_amount_is_quantity_times_price() {
        let line = charge_line(&charge(ChargeType::Medication, 3, 15_000), UserId::new(), Utc::now())
            .unwrap();
        assert_eq!(line.amount, Money::new(45_000));
        assert!(!line.is_mandatory);
        assert!(line.code.starts_with("CHG-20250305-"));
    }

    #[test]
    fn test_charge_rejects_system_types_and_bad_numbers() {
        let now = Utc::now();
        assert_eq!(
            charge_line(&charge(ChargeType::Nursing, 1, 10), UserId::new(), now).unwrap_err(),
            BillingError::ReservedChargeType(ChargeType::Nursing)
        );
        assert!(matches!(
            charge_line(&charge(ChargeType::Doctor, 0, 10), UserId::new(), now),
            Err(BillingError::InvalidInput(_))
        ));
        assert_eq!(
            charge_line(&charge(ChargeType::Doctor, 1, 0), UserId::new(), now).unwrap_err(),
            BillingError::NonPositiveAmount(Money::ZERO)
        );
        assert_eq!(
            charge_line(&charge(ChargeType::Doctor, u32::MAX, Money::MAX.units()), UserId::new(), now)
                .unwrap_err(),
            BillingError::AmountOverflow("charge amount")
        );
    }

    #[test]
    fn test_cash_payment_is_verified_on_receipt() {
        let user = UserId::new();
        let p = payment(draft(PaymentMethod::Cash, 200_000, None), user, Utc::now()).unwrap();
        assert_eq!(p.status, PaymentStatus::Verified);
        assert_eq!(p.verified_by, Some(user));
    }

    #[test]
    fn test_bank_transfer_needs_reference_and_stays_pending() {
        assert_eq!(
            payment(draft(PaymentMethod::BankTransfer, 10, Some("  ")), UserId::new(), Utc::now())
                .unwrap_err(),
            BillingError::MissingBankReference
        );
        let p = payment(
            draft(PaymentMethod::BankTransfer, 10, Some("TRF-001")),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(p.status, PaymentStatus::Pending);
        assert!(p.verified_at.is_none());
    }

    #[test]
    fn test_verify_and_reject_only_from_pending() {
        let pending = payment(
            draft(PaymentMethod::BankTransfer, 10, Some("TRF-001")),
            UserId::new(),
            Utc::now(),
        )
        .unwrap();
        let verified = verify(&pending, UserId::new(), Utc::now()).unwrap();
        assert_eq!(verified.status, PaymentStatus::Verified);
        assert!(matches!(
            verify(&verified, UserId::new(), Utc::now()),
            Err(BillingError::PaymentNotPending { status: PaymentStatus::Verified, .. })
        ));
        assert!(matches!(
            reject(&pending, UserId::new(), "", Utc::now()),
            Err(BillingError::InvalidInput(_))
        ));
        let rejected = reject(&pending, UserId::new(), "no funds received", Utc::now()).unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("no funds received"));
        assert!(reject(&rejected, UserId::new(), "again", Utc::now()).is_err());
    }
}
