//! Seed script for the fee portal
//!
//! Creates a handful of demo students (password `secret1`) in the configured
//! data dir, one of them with a recorded payment.
//! Run: cargo run --bin load_data
//! Re-running is safe: existing emails are skipped.

use chrono::Utc;

use fee_portal::auth::hash_password;
use fee_portal::config::{Config, LogSettings};
use fee_portal::models::{PaymentMethod, PaymentRecord, Student};
use fee_portal::payments::generate_transaction_id;
use fee_portal::storage::{Storage, StoreError, StudentStore};
use fee_portal::telemetry;

const DEMO_PASSWORD: &str = "secret1";

const DEMO_STUDENTS: &[(&str, &str, Option<f64>)] = &[
    ("Asha Rao", "asha@example.com", Some(5000.0)),
    ("Ben Okafor", "ben@example.com", None),
    ("Chen Wei", "chen@example.com", None),
    ("Dana Levi", "dana@example.com", None),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _guard = telemetry::init(&LogSettings::from_env());
    let config = Config::from_env();
    let storage = Storage::open(&config.data_dir)?;
    let password_hash = hash_password(DEMO_PASSWORD, config.bcrypt_cost)?;

    let mut created = 0;
    for (name, email, payment) in DEMO_STUDENTS {
        let student = Student::new(name.to_string(), email.to_string(), password_hash.clone());
        match storage.insert_student(&student).await {
            Ok(()) => created += 1,
            Err(StoreError::EmailTaken) => {
                println!("- {} already exists, skipped", email);
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(amount) = payment {
            let record = PaymentRecord {
                amount: *amount,
                date: Utc::now(),
                payment_method: PaymentMethod::Upi,
                transaction_id: generate_transaction_id(),
            };
            storage.append_payment(student.id, &record).await?;
        }
    }

    let students = storage.list_students().await?;
    let paid = students.iter().filter(|s| s.fees_paid).count();
    println!(
        "✅ Seeded {} new students into {} ({} total, {} paid)",
        created,
        config.data_dir.display(),
        students.len(),
        paid
    );

    Ok(())
}
