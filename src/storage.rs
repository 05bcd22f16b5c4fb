use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::models::{PaymentRecord, Student};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("student document could not be (de)serialized: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt index entry: {0}")]
    Corrupt(String),

    #[error("email already registered")]
    EmailTaken,

    #[error("student not found")]
    NotFound,
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

fn abort(err: impl Into<StoreError>) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err.into())
}

/// Normalised profile edits. `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Persistence seam used by the auth service and the payment processor.
///
/// Every method that mutates a student is a single read-modify-write, so callers
/// never hold a student across two store calls when changing it.
#[async_trait]
pub trait StudentStore: Send + Sync {
    /// Fails with [`StoreError::EmailTaken`] when the email is already indexed.
    async fn insert_student(&self, student: &Student) -> Result<(), StoreError>;

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Student>, StoreError>;

    /// All students in registration order.
    async fn list_students(&self) -> Result<Vec<Student>, StoreError>;

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<Student, StoreError>;

    /// Appends `record`, marks fees paid and returns only once the write is on disk.
    async fn append_payment(&self, id: Uuid, record: &PaymentRecord) -> Result<Student, StoreError>;
}

/// Sled-backed student store.
///
/// Trees:
/// - `students`: student id (16 bytes) -> JSON document
/// - `emails`: normalised email -> student id, the uniqueness index
#[derive(Clone)] // Sled handles are cheap to clone and thread-safe
pub struct Storage {
    db: Db,
    students: Tree,
    emails: Tree,
}

impl Storage {
    /// Open or create the Sled database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory database removed on drop; used by tests and dry runs.
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        let students = db.open_tree("students")?;
        let emails = db.open_tree("emails")?;
        Ok(Self { db, students, emails })
    }

    fn decode(bytes: &[u8]) -> Result<Student, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[async_trait]
impl StudentStore for Storage {
    async fn insert_student(&self, student: &Student) -> Result<(), StoreError> {
        let key = student.id.as_bytes().to_vec();
        let doc = serde_json::to_vec(student)?;

        (&self.students, &self.emails).transaction(|(students, emails)| {
            if emails.get(student.email.as_bytes())?.is_some() {
                return Err(abort(StoreError::EmailTaken));
            }
            emails.insert(student.email.as_bytes(), &key[..])?;
            students.insert(&key[..], doc.as_slice())?;
            Ok(())
        })?;

        debug!(student_id = %student.id, "student inserted");
        Ok(())
    }

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
        self.students
            .get(id.as_bytes())?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Student>, StoreError> {
        let Some(id_bytes) = self.emails.get(email.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id_bytes).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.get_student(id).await
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let mut students = vec![];
        for item in self.students.iter() {
            let (_, value) = item?;
            students.push(Self::decode(&value)?);
        }
        // Keys are random UUIDs; registration order comes from the document
        students.sort_by_key(|s| s.created_at);
        Ok(students)
    }

    async fn update_profile(&self, id: Uuid, changes: &ProfileChanges) -> Result<Student, StoreError> {
        let key = id.as_bytes().to_vec();

        let student = (&self.students, &self.emails).transaction(|(students, emails)| {
            let bytes = students
                .get(&key[..])?
                .ok_or_else(|| abort(StoreError::NotFound))?;
            let mut student: Student = serde_json::from_slice(&bytes).map_err(abort)?;

            if let Some(email) = &changes.email {
                if *email != student.email {
                    if emails.get(email.as_bytes())?.is_some() {
                        return Err(abort(StoreError::EmailTaken));
                    }
                    emails.remove(student.email.as_bytes())?;
                    emails.insert(email.as_bytes(), &key[..])?;
                    student.email = email.clone();
                }
            }
            if let Some(name) = &changes.name {
                student.name = name.clone();
            }
            student.updated_at = Utc::now();

            let doc = serde_json::to_vec(&student).map_err(abort)?;
            students.insert(&key[..], doc)?;
            Ok(student)
        })?;

        debug!(student_id = %id, "profile updated");
        Ok(student)
    }

    async fn append_payment(&self, id: Uuid, record: &PaymentRecord) -> Result<Student, StoreError> {
        let key = id.as_bytes().to_vec();

        let student = self.students.transaction(|students| {
            let bytes = students
                .get(&key[..])?
                .ok_or_else(|| abort(StoreError::NotFound))?;
            let mut student: Student = serde_json::from_slice(&bytes).map_err(abort)?;
            student.record_payment(record.clone());

            let doc = serde_json::to_vec(&student).map_err(abort)?;
            students.insert(&key[..], doc)?;
            Ok(student)
        })?;

        self.db.flush_async().await?;
        debug!(
            student_id = %id,
            transaction_id = %record.transaction_id,
            payments = student.payment_history.len(),
            "payment persisted"
        );
        Ok(student)
    }
}
