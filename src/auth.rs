use std::sync::Arc;
use std::time::Duration;

use bcrypt::{hash, verify};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{Claims, Student, StudentView};
use crate::storage::{StoreError, StudentStore};

pub const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MIN_PASSWORD_LEN: usize = 6;
const DUMMY_PASSWORD: &str = "no-such-student";

pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    hash(password, cost)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// Emails are the login key: compared trimmed and lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Extracts the token from an `Authorization: Bearer <token>` value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// HS256 signing keys plus the fixed token lifetime.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl,
        }
    }

    pub fn issue(&self, student_id: Uuid) -> Result<String, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: student_id.to_string(),
            iat: now,
            exp: now + self.ttl.as_secs() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
    }

    /// Checks signature and expiry.
    pub fn validate(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let token_data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        Ok(token_data.claims)
    }
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Deserialize, Debug, Clone, ToSchema)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Returned by register and login.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
pub struct AuthSession {
    pub token: String,
    pub student: StudentView,
}

/// Credential checks and token issuance over a [`StudentStore`].
pub struct AuthService {
    store: Arc<dyn StudentStore>,
    keys: TokenKeys,
    bcrypt_cost: u32,
    // Unknown emails are checked against this, so both login failures cost one bcrypt verify
    dummy_hash: String,
}

impl AuthService {
    pub fn new(store: Arc<dyn StudentStore>, keys: TokenKeys, bcrypt_cost: u32) -> Self {
        let dummy_hash = hash_password(DUMMY_PASSWORD, bcrypt_cost).unwrap_or_default();
        Self {
            store,
            keys,
            bcrypt_cost,
            dummy_hash,
        }
    }

    pub async fn register(&self, req: RegisterRequest) -> Result<AuthSession, AppError> {
        let name = req.name.trim().to_string();
        let email = normalize_email(&req.email);
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".into()));
        }
        if !email.contains('@') {
            return Err(AppError::Validation("A valid email is required".into()));
        }
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AppError::DuplicateEmail);
        }

        let password = req.password;
        let cost = self.bcrypt_cost;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| AppError::Server(e.to_string()))??;

        let student = Student::new(name, email, password_hash);
        // The index check inside the store settles concurrent registrations
        self.store.insert_student(&student).await.map_err(|e| match e {
            StoreError::EmailTaken => AppError::DuplicateEmail,
            other => other.into(),
        })?;

        info!(student_id = %student.id, "student registered");
        self.session_for(&student)
    }

    pub async fn login(&self, req: LoginRequest) -> Result<AuthSession, AppError> {
        let email = normalize_email(&req.email);
        let found = self.store.find_by_email(&email).await?;

        let password = req.password;
        let password_hash = match &found {
            Some(student) => student.password_hash.clone(),
            None => self.dummy_hash.clone(),
        };
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &password_hash))
            .await
            .map_err(|e| AppError::Server(e.to_string()))?
            .unwrap_or(false);

        let student = match found {
            Some(student) if matches => student,
            _ => return Err(AppError::InvalidCredentials),
        };

        debug!(student_id = %student.id, "student logged in");
        self.session_for(&student)
    }

    /// Resolves a bearer token to the student as currently stored.
    pub async fn verify(&self, token: Option<&str>) -> Result<Student, AppError> {
        let token = token.ok_or(AppError::Unauthenticated)?;
        let claims = self.keys.validate(token).map_err(|e| {
            debug!(error = %e, "token rejected");
            AppError::Unauthenticated
        })?;
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::Unauthenticated)?;

        self.store
            .get_student(id)
            .await?
            .ok_or(AppError::Unauthenticated)
    }

    fn session_for(&self, student: &Student) -> Result<AuthSession, AppError> {
        let token = self
            .keys
            .issue(student.id)
            .map_err(|e| AppError::Server(format!("token signing failed: {}", e)))?;
        Ok(AuthSession {
            token,
            student: student.view(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PaymentMethod, PaymentRecord};
    use crate::storage::Storage;

    const SECRET: &[u8] = b"test-secret";

    fn service() -> (AuthService, Arc<Storage>) {
        let storage = Arc::new(Storage::temporary().expect("temporary storage"));
        let service = AuthService::new(storage.clone(), TokenKeys::new(SECRET, TOKEN_TTL), 4);
        (service, storage)
    }

    fn register_req(name: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            name: name.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_register_normalizes_email_and_hashes_password() {
        let (auth, storage) = service();
        let session = auth
            .register(register_req("  Asha ", "  Asha@X.com ", "secret1"))
            .await
            .expect("register");

        assert_eq!(session.student.email, "asha@x.com");
        assert_eq!(session.student.name, "Asha");
        assert!(!session.student.fees_paid);

        let stored = storage.find_by_email("asha@x.com").await.unwrap().unwrap();
        assert_ne!(stored.password_hash, "secret1");
        assert!(verify_password("secret1", &stored.password_hash).unwrap());
        assert!(stored.payment_history.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_email_any_casing() {
        let (auth, _) = service();
        auth.register(register_req("Asha", "asha@x.com", "secret1")).await.unwrap();

        let err = auth
            .register(register_req("Imposter", "ASHA@x.COM", "secret2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DuplicateEmail));
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (auth, _) = service();
        for req in [
            register_req("", "a@x.com", "secret1"),
            register_req("Asha", "not-an-email", "secret1"),
            register_req("Asha", "a@x.com", "short"),
        ] {
            let err = auth.register(req).await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let (auth, _) = service();
        auth.register(register_req("Asha", "asha@x.com", "secret1")).await.unwrap();

        let wrong_password = auth
            .login(LoginRequest { email: "asha@x.com".into(), password: "nope123".into() })
            .await
            .unwrap_err();
        let unknown_email = auth
            .login(LoginRequest { email: "ghost@x.com".into(), password: "secret1".into() })
            .await
            .unwrap_err();

        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.status(), unknown_email.status());
        assert_eq!(wrong_password.kind(), unknown_email.kind());
    }

    #[tokio::test]
    async fn test_unknown_email_still_checks_a_hash() {
        let (auth, _) = service();
        assert!(auth.dummy_hash.starts_with("$2b$04$"), "{}", auth.dummy_hash);
        assert_eq!(verify_password("secret1", &auth.dummy_hash).ok(), Some(false));

        // Matching the dummy hash never logs anyone in
        let err = auth
            .login(LoginRequest { email: "ghost@x.com".into(), password: DUMMY_PASSWORD.into() })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_login_and_verify() {
        let (auth, _) = service();
        let registered = auth.register(register_req("Asha", "asha@x.com", "secret1")).await.unwrap();

        let session = auth
            .login(LoginRequest { email: " ASHA@x.com".into(), password: "secret1".into() })
            .await
            .expect("login");
        assert_eq!(session.student.id, registered.student.id);

        let student = auth.verify(Some(&session.token)).await.expect("verify");
        assert_eq!(student.id, registered.student.id);
    }

    #[tokio::test]
    async fn test_verify_rejects_bad_tokens() {
        let (auth, _) = service();
        let session = auth.register(register_req("Asha", "asha@x.com", "secret1")).await.unwrap();

        assert!(matches!(auth.verify(None).await, Err(AppError::Unauthenticated)));
        assert!(matches!(auth.verify(Some("garbage")).await, Err(AppError::Unauthenticated)));

        let foreign = TokenKeys::new(b"other-secret", TOKEN_TTL)
            .issue(session.student.id)
            .unwrap();
        assert!(matches!(auth.verify(Some(&foreign)).await, Err(AppError::Unauthenticated)));

        let past = Utc::now().timestamp() as usize - 2 * 3600;
        let expired = encode(
            &Header::default(),
            &Claims { sub: session.student.id.to_string(), iat: past - 60, exp: past },
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(auth.verify(Some(&expired)).await, Err(AppError::Unauthenticated)));
    }

    #[tokio::test]
    async fn test_verify_reads_current_state() {
        let (auth, storage) = service();
        let session = auth.register(register_req("Asha", "asha@x.com", "secret1")).await.unwrap();

        let record = PaymentRecord {
            amount: 5000.0,
            date: Utc::now(),
            payment_method: PaymentMethod::Upi,
            transaction_id: "TXN1abc".into(),
        };
        storage.append_payment(session.student.id, &record).await.unwrap();

        // Token was issued while unpaid; verify must still see the payment
        let student = auth.verify(Some(&session.token)).await.unwrap();
        assert!(student.fees_paid);
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
