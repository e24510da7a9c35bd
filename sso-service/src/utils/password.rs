use argon2::{
    password_hash::{
        rand_core::OsRng, PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};

/// Newtype for password to prevent accidental logging
#[derive(Clone)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Newtype for password hash
#[derive(Debug, Clone)]
pub struct PasswordHashString(String);

impl PasswordHashString {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Argon2id hasher with configurable cost.
///
/// Verification reads the cost from the stored PHC string, so hashes made
/// with older parameters keep verifying after a cost change.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    params: Params,
}

impl PasswordHasher {
    /// `memory_kib`, `iterations` and `parallelism` map to Argon2 m, t and p.
    pub fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Result<Self, anyhow::Error> {
        let params = Params::new(memory_kib, iterations, parallelism, None)
            .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {}", e))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }

    /// Hash a password; the random salt is embedded in the output.
    pub fn hash(&self, password: &Password) -> Result<PasswordHashString, anyhow::Error> {
        let salt = SaltString::generate(&mut OsRng);

        let password_hash = self
            .argon2()
            .hash_password(password.as_str().as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();

        Ok(PasswordHashString::new(password_hash))
    }

    /// Constant-time check of `password` against a stored hash.
    pub fn verify(
        &self,
        password: &Password,
        password_hash: &PasswordHashString,
    ) -> Result<(), anyhow::Error> {
        let parsed_hash = PasswordHash::new(password_hash.as_str())
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;

        self.argon2()
            .verify_password(password.as_str().as_bytes(), &parsed_hash)
            .map_err(|_| anyhow::anyhow!("Password verification failed"))
    }
}

impl Default for PasswordHasher {
    fn default() -> Self {
        // 64 MiB, 3 passes: roughly 100ms per verification on server hardware.
        Self {
            params: Params::new(65536, 3, 1, None).unwrap_or_default(),
        }
    }
}
