use uuid::Uuid;

/// Mints gateway references. Uniqueness is enforced by the store; a
/// generator only needs to make collisions unlikely.
pub trait ReferenceGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// `{prefix}-` followed by 12 upper-case hex characters from a v4 UUID.
#[derive(Debug, Clone)]
pub struct PrefixedReferenceGenerator {
    prefix: String,
}

impl PrefixedReferenceGenerator {
    pub const SUFFIX_LEN: usize = 12;

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for PrefixedReferenceGenerator {
    fn default() -> Self {
        Self::new("TRV")
    }
}

impl ReferenceGenerator for PrefixedReferenceGenerator {
    fn generate(&self) -> String {
        let simple = Uuid::new_v4().simple().to_string();
        format!(
            "{}-{}",
            self.prefix,
            simple[..Self::SUFFIX_LEN].to_uppercase()
        )
    }
}
