use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Student document as persisted in Sled.
/// `password_hash` never leaves the server; use [`StudentView`] for responses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub email: String, // normalised: trimmed + lowercased
    pub password_hash: String,
    pub fees_paid: bool,
    pub payment_history: Vec<PaymentRecord>, // append-only, chronological
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn new(name: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            email,
            password_hash,
            fees_paid: false,
            payment_history: vec![],
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a successful payment. Fee status only ever moves to paid.
    pub fn record_payment(&mut self, record: PaymentRecord) {
        self.updated_at = record.date;
        self.payment_history.push(record);
        self.fees_paid = true;
    }

    pub fn view(&self) -> StudentView {
        StudentView::from(self)
    }
}

/// Redacted projection: no password, no history.
/// Used by the auth responses and by the roster listing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub fees_paid: bool,
}

impl From<&Student> for StudentView {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            name: student.name.clone(),
            email: student.email.clone(),
            fees_paid: student.fees_paid,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Credit,
    Debit,
    Upi,
}

impl PaymentMethod {
    pub fn requires_card(self) -> bool {
        matches!(self, PaymentMethod::Credit | PaymentMethod::Debit)
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PaymentMethod::Credit => "credit",
            PaymentMethod::Debit => "debit",
            PaymentMethod::Upi => "upi",
        })
    }
}

/// Immutable once appended to a student's history.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub amount: f64,
    pub date: DateTime<Utc>,
    pub payment_method: PaymentMethod,
    pub transaction_id: String,
}

/// JWT claims. `sub` is the student id; the student itself is always re-read from the store.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Claims {
    pub sub: String,
    pub iat: usize,
    pub exp: usize,
}

/// Delta pushed to every connected roster after a payment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentUpdate {
    pub student_id: Uuid,
    pub name: String,
    pub email: String,
    pub fees_paid: bool,
}

impl From<&Student> for PaymentUpdate {
    fn from(student: &Student) -> Self {
        Self {
            student_id: student.id,
            name: student.name.clone(),
            email: student.email.clone(),
            fees_paid: student.fees_paid,
        }
    }
}

/// Envelope for frames on the `/ws` channel.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "paymentUpdate")]
    PaymentUpdate(PaymentUpdate),
}
