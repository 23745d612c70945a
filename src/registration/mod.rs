//! Account registration.
//!
//! Drivers are admitted as soon as their fields are valid. Owners must also
//! upload a photo of their parking lot: it is stored, sent once to the
//! classifier and kept only if the account is created.
mod classifier;
mod storage;

pub use classifier::*;
pub use storage::*;

use std::sync::Arc;

use axum::extract::FromRef;
use image::ImageFormat;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::AppState;
use crate::crypto::{CryptoError, PasswordManager};
use crate::database::RepositoryError;
use crate::error::ServerError;
use crate::user::{AccountMode, NewUser, Role, Status, User, UserRepository};

/// Largest accepted parking photo, 4 MiB.
pub const MAX_PHOTO_SIZE: usize = 4 * 1024 * 1024;

/// An uploaded file.
#[derive(Clone, Default, PartialEq)]
pub struct PhotoUpload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for PhotoUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoUpload")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl PhotoUpload {
    /// File extension matching the detected image format.
    pub fn extension(&self) -> Option<&'static str> {
        match image::guess_format(&self.bytes).ok()? {
            ImageFormat::Jpeg => Some("jpg"),
            ImageFormat::Png => Some("png"),
            ImageFormat::Gif => Some("gif"),
            ImageFormat::Bmp => Some("bmp"),
            ImageFormat::WebP => Some("webp"),
            _ => None,
        }
    }
}

/// Fields submitted by a candidate.
#[derive(Debug, Default, Validate)]
pub struct RegistrationAttempt {
    #[validate(custom(
        function = "validate_role",
        message = "Role must be either driver or owner."
    ))]
    pub role: String,
    #[validate(
        length(
            min = 1,
            max = 255,
            message = "Name must contain between 1 and 255 characters."
        ),
        custom(
            function = "validate_name",
            message = "Name may only contain letters, spaces and hyphens."
        )
    )]
    pub name: String,
    #[validate(
        email(message = "Email must be formatted."),
        length(max = 255, message = "Email must not exceed 255 characters."),
        custom(
            function = "validate_email_domain",
            message = "Email domain must contain a dot."
        )
    )]
    pub email: String,
    #[validate(
        length(
            min = 8,
            max = 255,
            message = "Password must contain between 8 and 255 characters."
        ),
        custom(
            function = "validate_password",
            message = "Password must mix lowercase, uppercase letters and digits."
        ),
        must_match(
            other = "password_confirmation",
            message = "Passwords do not match."
        )
    )]
    pub password: String,
    pub password_confirmation: String,
    pub parking_photo: Option<PhotoUpload>,
}

impl RegistrationAttempt {
    /// Run every field rule. The photo is only checked for owners.
    pub fn validate_fields(&self) -> Result<(), ValidationErrors> {
        let mut errors = match self.validate() {
            Ok(()) => ValidationErrors::new(),
            Err(errors) => errors,
        };

        if matches!(self.role.parse::<Role>(), Ok(Role::Owner)) {
            if let Some(photo) = &self.parking_photo {
                if let Err(error) = validate_photo(photo) {
                    errors.add("parking_photo", error);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

pub fn validate_role(role: &str) -> Result<(), ValidationError> {
    role.parse::<Role>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("role"))
}

pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name
        .chars()
        .all(|c| c.is_alphabetic() || c == ' ' || c == '-')
    {
        Ok(())
    } else {
        Err(ValidationError::new("name"))
    }
}

/// Require a dot somewhere after the `@`.
pub fn validate_email_domain(email: &str) -> Result<(), ValidationError> {
    match email.rsplit_once('@') {
        Some((_, domain)) if domain.contains('.') => Ok(()),
        _ => Err(ValidationError::new("email_domain")),
    }
}

pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let lowercase = password.chars().any(|c| c.is_lowercase());
    let uppercase = password.chars().any(|c| c.is_uppercase());
    let digit = password.chars().any(|c| c.is_ascii_digit());

    if lowercase && uppercase && digit {
        Ok(())
    } else {
        Err(ValidationError::new("password_policy"))
    }
}

pub fn validate_photo(photo: &PhotoUpload) -> Result<(), ValidationError> {
    if photo.bytes.len() > MAX_PHOTO_SIZE {
        return Err(ValidationError::new("photo_size")
            .with_message("Photo must not exceed 4 MiB.".into()));
    }

    if photo.extension().is_none() {
        return Err(ValidationError::new("photo_format").with_message(
            "Photo must be a jpeg, png, gif, bmp or webp image.".into(),
        ));
    }

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    #[error("A photo of your parking is required to register as an owner.")]
    PhotoRequired,

    #[error("The photo could not be verified as a parking.")]
    NotAParking,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl RegistrationError {
    fn outcome(&self) -> &'static str {
        match self {
            RegistrationError::Validation(_) => "invalid",
            RegistrationError::PhotoRequired => "photo_required",
            RegistrationError::NotAParking => "not_a_parking",
            _ => "error",
        }
    }
}

impl From<RegistrationError> for ServerError {
    fn from(err: RegistrationError) -> Self {
        match err {
            RegistrationError::Validation(errors) => {
                ServerError::Validation(errors)
            },
            RegistrationError::PhotoRequired => {
                photo_rejected("photo_required", err.to_string())
            },
            RegistrationError::NotAParking => {
                photo_rejected("not_a_parking", err.to_string())
            },
            RegistrationError::Storage(err) => ServerError::Storage(err),
            RegistrationError::Crypto(err) => ServerError::Crypto(err),
            RegistrationError::Repository(err) => ServerError::Repository(err),
        }
    }
}

fn photo_rejected(code: &'static str, message: String) -> ServerError {
    let mut errors = ValidationErrors::new();
    errors.add(
        "parking_photo",
        ValidationError::new(code).with_message(message.into()),
    );
    ServerError::Validation(errors)
}

/// Admits or rejects registration attempts.
#[derive(Clone)]
pub struct RegistrationGate {
    users: Arc<dyn UserRepository>,
    store: Arc<dyn FileStore>,
    classifier: Arc<dyn Classifier>,
    passwords: Arc<PasswordManager>,
}

impl FromRef<AppState> for RegistrationGate {
    fn from_ref(state: &AppState) -> RegistrationGate {
        RegistrationGate::new(
            Arc::clone(&state.db.users),
            Arc::clone(&state.storage),
            Arc::clone(&state.classifier),
            Arc::clone(&state.crypto),
        )
    }
}

impl RegistrationGate {
    pub fn new(
        users: Arc<dyn UserRepository>,
        store: Arc<dyn FileStore>,
        classifier: Arc<dyn Classifier>,
        passwords: Arc<PasswordManager>,
    ) -> Self {
        Self {
            users,
            store,
            classifier,
            passwords,
        }
    }

    /// Run one attempt to completion. No user is created and no photo is
    /// left behind unless the attempt is admitted.
    pub async fn register(
        &self,
        attempt: RegistrationAttempt,
    ) -> Result<User, RegistrationError> {
        let role = attempt
            .role
            .parse::<Role>()
            .map_or("unknown", |role| role.as_str());

        let result = self.admit(attempt).await;

        let outcome = match &result {
            Ok(_) => "admitted",
            Err(err) => err.outcome(),
        };
        metrics::counter!("registrations_total", "role" => role, "outcome" => outcome)
            .increment(1);

        match &result {
            Ok(user) => {
                tracing::info!(user_id = user.id, role, "user registered")
            },
            Err(err) => {
                tracing::info!(role, outcome, error = %err, "registration rejected")
            },
        }

        result
    }

    async fn admit(
        &self,
        attempt: RegistrationAttempt,
    ) -> Result<User, RegistrationError> {
        attempt.validate_fields()?;

        if self.users.find_by_email(&attempt.email).await?.is_some() {
            let mut errors = ValidationErrors::new();
            errors.add(
                "email",
                ValidationError::new("unique")
                    .with_message("Email is already registered.".into()),
            );
            return Err(errors.into());
        }

        let role = attempt.role.parse::<Role>().map_err(|_| {
            let mut errors = ValidationErrors::new();
            errors.add("role", ValidationError::new("role"));
            errors
        })?;

        match role {
            Role::Driver => {
                let password = self.passwords.hash_password(&attempt.password)?;

                Ok(self
                    .users
                    .create(NewUser {
                        name: attempt.name,
                        email: attempt.email,
                        password,
                        role,
                        parking_photo_path: None,
                        is_parking_verified: false,
                        account_mode: None,
                        status: Status::Active,
                    })
                    .await?)
            },
            Role::Owner => self.admit_owner(attempt).await,
        }
    }

    async fn admit_owner(
        &self,
        attempt: RegistrationAttempt,
    ) -> Result<User, RegistrationError> {
        let Some(photo) = &attempt.parking_photo else {
            return Err(RegistrationError::PhotoRequired);
        };
        let extension = validate_photo(photo)
            .and_then(|()| {
                photo
                    .extension()
                    .ok_or_else(|| ValidationError::new("photo_format"))
            })
            .map_err(|error| {
                let mut errors = ValidationErrors::new();
                errors.add("parking_photo", error);
                errors
            })?;

        let file =
            TentativeFile::store(Arc::clone(&self.store), &photo.bytes, extension)
                .await?;

        if !self.classifier.classify(&file.absolute_path()).await {
            if let Err(err) = file.discard().await {
                tracing::error!(error = %err, "rejected photo not deleted");
            }
            return Err(RegistrationError::NotAParking);
        }

        let created = match self.passwords.hash_password(&attempt.password) {
            Ok(password) => self
                .users
                .create(NewUser {
                    name: attempt.name,
                    email: attempt.email,
                    password,
                    role: Role::Owner,
                    parking_photo_path: Some(file.path().to_owned()),
                    is_parking_verified: true,
                    account_mode: Some(AccountMode::Basic),
                    status: Status::Active,
                })
                .await
                .map_err(RegistrationError::from),
            Err(err) => Err(err.into()),
        };

        match created {
            Ok(user) => {
                file.commit();
                Ok(user)
            },
            Err(err) => {
                if let Err(err) = file.discard().await {
                    tracing::error!(error = %err, "orphan photo not deleted");
                }
                Err(err)
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::database::{MemoryStore, RepositoryResult};

    pub const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    /// Classifier answering a fixed verdict.
    #[derive(Default)]
    pub struct FixedClassifier {
        pub verdict: bool,
        pub calls: AtomicUsize,
    }

    impl FixedClassifier {
        pub fn new(verdict: bool) -> Self {
            Self {
                verdict,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, image_path: &Path) -> bool {
            assert!(image_path.is_absolute());
            assert!(image_path.exists());
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.verdict
        }
    }

    /// Users repository whose inserts always fail.
    struct BrokenUsers;

    #[async_trait]
    impl UserRepository for BrokenUsers {
        async fn create(&self, _: NewUser) -> RepositoryResult<User> {
            Err(RepositoryError::Sql(sqlx::Error::PoolTimedOut))
        }

        async fn find_by_id(&self, _: i64) -> RepositoryResult<Option<User>> {
            Ok(None)
        }

        async fn find_by_email(
            &self,
            _: &str,
        ) -> RepositoryResult<Option<User>> {
            Ok(None)
        }

        async fn insert_token(&self, _: &str, _: i64) -> RepositoryResult<()> {
            Ok(())
        }

        async fn find_by_token(
            &self,
            _: &str,
        ) -> RepositoryResult<Option<User>> {
            Ok(None)
        }

        async fn revoke_token(&self, _: &str) -> RepositoryResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        classifier: Arc<FixedClassifier>,
        gate: RegistrationGate,
    }

    impl Fixture {
        fn new(verdict: bool) -> Self {
            Self::with_users(verdict, Arc::new(MemoryStore::default()))
        }

        fn with_users(verdict: bool, users: Arc<dyn UserRepository>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let classifier = Arc::new(FixedClassifier::new(verdict));
            let gate = RegistrationGate::new(
                users,
                Arc::new(LocalFileStore::new(dir.path()).unwrap()),
                classifier.clone(),
                Arc::new(PasswordManager::new(None).unwrap()),
            );

            Self {
                dir,
                classifier,
                gate,
            }
        }

        fn photos(&self) -> Vec<PathBuf> {
            match std::fs::read_dir(self.dir.path().join("parking_photos")) {
                Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
                Err(_) => Vec::new(),
            }
        }
    }

    pub fn attempt(role: &str) -> RegistrationAttempt {
        RegistrationAttempt {
            role: role.into(),
            name: "Jean-Luc Picard".into(),
            email: "jean-luc@example.com".into(),
            password: "Enterprise1701".into(),
            password_confirmation: "Enterprise1701".into(),
            parking_photo: None,
        }
    }

    fn photo(bytes: &[u8]) -> Option<PhotoUpload> {
        Some(PhotoUpload {
            file_name: Some("lot.png".into()),
            content_type: Some("image/png".into()),
            bytes: bytes.to_vec(),
        })
    }

    #[test]
    fn test_field_rules() {
        assert!(attempt("driver").validate_fields().is_ok());

        let errors = RegistrationAttempt {
            role: "admin".into(),
            name: "R2-D2".into(),
            email: "user@localhost".into(),
            password: "password".into(),
            password_confirmation: "other".into(),
            parking_photo: None,
        }
        .validate_fields()
        .unwrap_err();
        let fields = errors.field_errors();

        assert!(fields.contains_key("role"));
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("password"));
    }

    #[test]
    fn test_name_accepts_accents_and_hyphens() {
        assert!(validate_name("Zoé Saint-Éloi").is_ok());
        assert!(validate_name("O'Brien").is_err());
    }

    #[test]
    fn test_password_policy() {
        assert!(validate_password("Passw0rd").is_ok());
        assert!(validate_password("password0").is_err());
        assert!(validate_password("PASSWORD0").is_err());
        assert!(validate_password("Password").is_err());
    }

    #[test]
    fn test_photo_rules() {
        let mut owner = attempt("owner");
        owner.parking_photo = photo(b"GIF89a......");
        assert!(owner.validate_fields().is_ok());

        owner.parking_photo = photo(b"%PDF-1.7");
        let errors = owner.validate_fields().unwrap_err();
        assert!(errors.field_errors().contains_key("parking_photo"));

        let mut big = PNG.to_vec();
        big.resize(MAX_PHOTO_SIZE + 1, 0);
        owner.parking_photo = photo(&big);
        assert!(owner.validate_fields().is_err());

        // Role spelling does not bypass the photo rules.
        for role in ["Owner", "OWNER", " owner"] {
            let mut owner = attempt(role);
            owner.parking_photo = photo(&big);
            let errors = owner.validate_fields().unwrap_err();
            assert!(errors.field_errors().contains_key("parking_photo"), "{role}");
        }

        // Drivers' uploads are ignored.
        let mut driver = attempt("driver");
        driver.parking_photo = photo(b"%PDF-1.7");
        assert!(driver.validate_fields().is_ok());
    }

    #[tokio::test]
    async fn test_driver_admitted() {
        let fixture = Fixture::new(true);

        let user = fixture.gate.register(attempt("driver")).await.unwrap();

        assert_eq!(user.role, Role::Driver);
        assert!(!user.is_parking_verified);
        assert_eq!(user.account_mode, None);
        assert_eq!(user.status, Status::Active);
        assert_ne!(user.password, "Enterprise1701");
        assert_eq!(fixture.classifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_owner_without_photo() {
        let fixture = Fixture::new(true);

        let err = fixture.gate.register(attempt("owner")).await.unwrap_err();

        assert!(matches!(err, RegistrationError::PhotoRequired));
        assert_eq!(fixture.classifier.calls(), 0);
        assert!(fixture.photos().is_empty());
    }

    #[tokio::test]
    async fn test_owner_rejected_photo_is_deleted() {
        let fixture = Fixture::new(false);
        let mut owner = attempt("owner");
        owner.parking_photo = photo(PNG);

        let err = fixture.gate.register(owner).await.unwrap_err();

        assert!(matches!(err, RegistrationError::NotAParking));
        assert_eq!(fixture.classifier.calls(), 1);
        assert!(fixture.photos().is_empty());

        // No ghost account: the same email can register afterwards.
        let driver = fixture.gate.register(attempt("driver")).await;
        assert!(driver.is_ok());
    }

    #[tokio::test]
    async fn test_owner_admitted_photo_is_kept() {
        let fixture = Fixture::new(true);
        let mut owner = attempt("owner");
        owner.parking_photo = photo(PNG);

        let user = fixture.gate.register(owner).await.unwrap();

        assert!(user.is_verified_owner());
        assert_eq!(user.account_mode, Some(AccountMode::Basic));
        assert_eq!(fixture.classifier.calls(), 1);

        let photos = fixture.photos();
        assert_eq!(photos.len(), 1);
        let stored = user.parking_photo_path.unwrap();
        assert!(stored.ends_with(".png"));
        assert!(photos[0].ends_with(&stored));
    }

    #[tokio::test]
    async fn test_oversized_photo_never_stored() {
        let fixture = Fixture::new(true);
        let mut big = PNG.to_vec();
        big.resize(MAX_PHOTO_SIZE + 1, 0);
        let mut owner = attempt("Owner");
        owner.parking_photo = photo(&big);

        let err = fixture.gate.register(owner).await.unwrap_err();

        let RegistrationError::Validation(errors) = err else {
            panic!("expected a validation error, got {err:?}");
        };
        assert!(errors.field_errors().contains_key("parking_photo"));
        assert_eq!(fixture.classifier.calls(), 0);
        assert!(fixture.photos().is_empty());
        assert!(
            fixture
                .gate
                .users
                .find_by_email("jean-luc@example.com")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_invalid_fields_store_nothing() {
        let fixture = Fixture::new(true);
        let mut owner = attempt("owner");
        owner.email = "not-an-email".into();
        owner.parking_photo = photo(PNG);

        let err = fixture.gate.register(owner).await.unwrap_err();

        assert!(matches!(err, RegistrationError::Validation(_)));
        assert_eq!(fixture.classifier.calls(), 0);
        assert!(fixture.photos().is_empty());
    }

    #[tokio::test]
    async fn test_email_already_registered() {
        let fixture = Fixture::new(true);
        fixture.gate.register(attempt("driver")).await.unwrap();

        let mut owner = attempt("owner");
        owner.parking_photo = photo(PNG);
        let err = fixture.gate.register(owner).await.unwrap_err();

        match err {
            RegistrationError::Validation(errors) => {
                assert!(errors.field_errors().contains_key("email"))
            },
            err => panic!("unexpected error: {err}"),
        }
        assert_eq!(fixture.classifier.calls(), 0);
        assert!(fixture.photos().is_empty());
    }

    #[tokio::test]
    async fn test_persistence_failure_deletes_photo() {
        let fixture = Fixture::with_users(true, Arc::new(BrokenUsers));
        let mut owner = attempt("owner");
        owner.parking_photo = photo(PNG);

        let err = fixture.gate.register(owner).await.unwrap_err();

        assert!(matches!(err, RegistrationError::Repository(_)));
        assert_eq!(fixture.classifier.calls(), 1);
        assert!(fixture.photos().is_empty());
    }

    #[test]
    fn test_gate_rejections_surface_on_photo_field() {
        for err in [
            RegistrationError::PhotoRequired,
            RegistrationError::NotAParking,
        ] {
            match ServerError::from(err) {
                ServerError::Validation(errors) => {
                    let fields = errors.field_errors();
                    assert_eq!(fields.len(), 1);
                    assert_eq!(fields["parking_photo"].len(), 1);
                },
                err => panic!("unexpected error: {err}"),
            }
        }
    }
}
