//! Simulated fee payment.
//!
//! No gateway is contacted: a well-formed request always succeeds. The student
//! is written (and flushed) first, the broadcast goes out second, so subscribers
//! never hear about a payment the store does not have.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::broadcast::Broadcaster;
use crate::error::AppError;
use crate::models::{PaymentMethod, PaymentRecord, PaymentUpdate, StudentView};
use crate::storage::StudentStore;

const TXN_PREFIX: &str = "TXN";
const TXN_SUFFIX_LEN: usize = 9;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `TXN` + unix millis + 9 random base36 chars.
pub fn generate_transaction_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..TXN_SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{}{}{}", TXN_PREFIX, Utc::now().timestamp_millis(), suffix)
}

/// Payment form as submitted. Card fields are checked for shape only and never stored.
#[derive(Serialize, Deserialize, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    #[serde(deserialize_with = "number_or_numeric_string")]
    pub amount: f64,
    pub payment_method: PaymentMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cardholder_name: Option<String>,
}

impl fmt::Debug for PaymentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentRequest")
            .field("amount", &self.amount)
            .field("payment_method", &self.payment_method)
            .field("card", &self.card_number.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// Web forms post the amount as a string
fn number_or_numeric_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Number(f64),
        Text(String),
    }

    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n),
        Amount::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn digits(value: &str) -> Option<String> {
    let digits: String = value.chars().filter(|c| !matches!(c, ' ' | '-')).collect();
    (!digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())).then_some(digits)
}

fn valid_expiry(value: &str) -> bool {
    let Some((month, year)) = value.trim().split_once('/') else {
        return false;
    };
    let month_ok = month.len() == 2 && matches!(month.parse::<u8>(), Ok(1..=12));
    let year_ok = year.len() == 2 && year.chars().all(|c| c.is_ascii_digit());
    month_ok && year_ok
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(AppError::Validation("Amount must be a positive number".into()));
        }
        if !self.payment_method.requires_card() {
            return Ok(());
        }

        let card = self.card_number.as_deref().and_then(digits);
        if !matches!(card.as_ref().map(String::len), Some(12..=19)) {
            return Err(AppError::Validation("Card number must be 12-19 digits".into()));
        }
        if !self.expiry_date.as_deref().is_some_and(valid_expiry) {
            return Err(AppError::Validation("Expiry date must be MM/YY".into()));
        }
        let cvv = self.cvv.as_deref().and_then(digits);
        if !matches!(cvv.as_ref().map(String::len), Some(3..=4)) {
            return Err(AppError::Validation("CVV must be 3 or 4 digits".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PaymentReceipt {
    pub transaction_id: String,
    pub student: StudentView,
}

pub struct PaymentProcessor {
    store: Arc<dyn StudentStore>,
    broadcaster: Broadcaster,
}

impl PaymentProcessor {
    pub fn new(store: Arc<dyn StudentStore>, broadcaster: Broadcaster) -> Self {
        Self { store, broadcaster }
    }

    /// Records a payment for an already-authenticated student and announces it.
    ///
    /// Emits exactly one [`PaymentUpdate`] on success and none on any failure.
    pub async fn process(&self, student_id: Uuid, req: PaymentRequest) -> Result<PaymentReceipt, AppError> {
        req.validate()?;

        let record = PaymentRecord {
            amount: req.amount,
            date: Utc::now(),
            payment_method: req.payment_method,
            transaction_id: generate_transaction_id(),
        };

        let student = self.store.append_payment(student_id, &record).await?;
        let subscribers = self.broadcaster.publish(PaymentUpdate::from(&student));

        info!(
            student_id = %student.id,
            transaction_id = %record.transaction_id,
            amount = record.amount,
            subscribers,
            "payment processed"
        );

        Ok(PaymentReceipt {
            transaction_id: record.transaction_id,
            student: student.view(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Student;
    use crate::storage::{ProfileChanges, StoreError, Storage};
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Delegates to a real store but loses the disk on every payment write.
    struct FailingStore(Storage);

    #[async_trait]
    impl StudentStore for FailingStore {
        async fn insert_student(&self, student: &Student) -> Result<(), StoreError> {
            self.0.insert_student(student).await
        }
        async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
            self.0.get_student(id).await
        }
        async fn find_by_email(&self, email: &str) -> Result<Option<Student>, StoreError> {
            self.0.find_by_email(email).await
        }
        async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
            self.0.list_students().await
        }
        async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<Student, StoreError> {
            self.0.update_profile(id, changes).await
        }
        async fn append_payment(&self, _id: Uuid, _record: &PaymentRecord) -> Result<Student, StoreError> {
            Err(StoreError::Sled(sled::Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk gone",
            ))))
        }
    }

    fn card_request(amount: f64) -> PaymentRequest {
        PaymentRequest {
            amount,
            payment_method: PaymentMethod::Credit,
            card_number: Some("4111 1111 1111 1111".into()),
            expiry_date: Some("12/29".into()),
            cvv: Some("123".into()),
            cardholder_name: Some("Asha".into()),
        }
    }

    async fn seeded(store: &dyn StudentStore) -> Student {
        let student = Student::new("Asha".into(), "asha@x.com".into(), "hash".into());
        store.insert_student(&student).await.unwrap();
        student
    }

    fn is_transaction_id(id: &str) -> bool {
        let Some(rest) = id.strip_prefix("TXN") else {
            return false;
        };
        if rest.len() <= TXN_SUFFIX_LEN {
            return false;
        }
        let (millis, suffix) = rest.split_at(rest.len() - TXN_SUFFIX_LEN);
        millis.chars().all(|c| c.is_ascii_digit()) && suffix.chars().all(|c| c.is_ascii_alphanumeric())
    }

    #[tokio::test]
    async fn test_payment_updates_student_and_broadcasts_once() {
        let storage = Arc::new(Storage::temporary().unwrap());
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        let processor = PaymentProcessor::new(storage.clone(), broadcaster);
        let student = seeded(storage.as_ref()).await;

        let receipt = processor.process(student.id, card_request(5000.0)).await.unwrap();
        assert!(is_transaction_id(&receipt.transaction_id), "{}", receipt.transaction_id);
        assert!(receipt.student.fees_paid);

        let stored = storage.get_student(student.id).await.unwrap().unwrap();
        assert!(stored.fees_paid);
        assert_eq!(stored.payment_history.len(), 1);
        assert_eq!(stored.payment_history[0].transaction_id, receipt.transaction_id);
        assert_eq!(stored.payment_history[0].amount, 5000.0);

        let event = sub.try_next().expect("one event");
        assert_eq!(event.student_id, student.id);
        assert!(event.fees_paid);
        assert_eq!(sub.try_next(), None);
    }

    #[tokio::test]
    async fn test_second_payment_keeps_paid_and_appends() {
        let storage = Arc::new(Storage::temporary().unwrap());
        let processor = PaymentProcessor::new(storage.clone(), Broadcaster::default());
        let student = seeded(storage.as_ref()).await;

        let first = processor.process(student.id, card_request(2500.0)).await.unwrap();
        let upi = PaymentRequest {
            amount: 2500.0,
            payment_method: PaymentMethod::Upi,
            card_number: None,
            expiry_date: None,
            cvv: None,
            cardholder_name: None,
        };
        let second = processor.process(student.id, upi).await.unwrap();
        assert_ne!(first.transaction_id, second.transaction_id);

        let stored = storage.get_student(student.id).await.unwrap().unwrap();
        assert!(stored.fees_paid);
        let ids: Vec<_> = stored.payment_history.iter().map(|r| r.transaction_id.clone()).collect();
        assert_eq!(ids, vec![first.transaction_id, second.transaction_id]);
    }

    #[tokio::test]
    async fn test_no_event_when_persistence_fails() {
        let store = Arc::new(FailingStore(Storage::temporary().unwrap()));
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        let processor = PaymentProcessor::new(store.clone(), broadcaster);
        let student = seeded(store.as_ref()).await;

        let err = processor.process(student.id, card_request(5000.0)).await.unwrap_err();
        assert!(matches!(err, AppError::Server(_)));
        assert_eq!(sub.try_next(), None);

        let stored = store.get_student(student.id).await.unwrap().unwrap();
        assert!(!stored.fees_paid);
    }

    #[tokio::test]
    async fn test_unknown_student() {
        let storage = Arc::new(Storage::temporary().unwrap());
        let broadcaster = Broadcaster::default();
        let mut sub = broadcaster.subscribe();
        let processor = PaymentProcessor::new(storage, broadcaster);

        let err = processor.process(Uuid::new_v4(), card_request(5000.0)).await.unwrap_err();
        assert!(matches!(err, AppError::StudentNotFound));
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_validation() {
        assert!(card_request(5000.0).validate().is_ok());
        assert!(card_request(0.0).validate().is_err());
        assert!(card_request(-10.0).validate().is_err());
        assert!(card_request(f64::NAN).validate().is_err());

        let mut short_card = card_request(100.0);
        short_card.card_number = Some("4111".into());
        assert!(short_card.validate().is_err());

        let mut bad_expiry = card_request(100.0);
        bad_expiry.expiry_date = Some("13/29".into());
        assert!(bad_expiry.validate().is_err());

        let mut bad_cvv = card_request(100.0);
        bad_cvv.cvv = Some("12a".into());
        assert!(bad_cvv.validate().is_err());

        let mut missing = card_request(100.0);
        missing.card_number = None;
        assert!(matches!(missing.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_amount_accepts_form_strings() {
        let req: PaymentRequest =
            serde_json::from_str(r#"{"amount":"5000","paymentMethod":"upi"}"#).unwrap();
        assert_eq!(req.amount, 5000.0);
        let req: PaymentRequest =
            serde_json::from_str(r#"{"amount":1250.5,"paymentMethod":"debit"}"#).unwrap();
        assert_eq!(req.amount, 1250.5);
        assert!(serde_json::from_str::<PaymentRequest>(r#"{"amount":"lots","paymentMethod":"upi"}"#).is_err());
    }

    #[test]
    fn test_transaction_ids_are_unique_and_well_formed() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_transaction_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| is_transaction_id(id)));
    }

    #[test]
    fn test_debug_redacts_card() {
        let rendered = format!("{:?}", card_request(10.0));
        assert!(!rendered.contains("4111"));
        assert!(!rendered.contains("123"));
    }
}
