use crate::core::{DocError, Result, SerializerOptions};
use std::fmt;

/// Endpoint of the local document database emulator.
pub const EMULATOR_ENDPOINT: &str = "https://localhost:8081/";

pub const DEFAULT_DATABASE_THROUGHPUT: u32 = 1000;

/// Account credential. Either form authenticates the same account.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Credential {
    /// Shared account key.
    Key(String),
    /// Bearer token issued by an identity provider.
    Token(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(_) => f.write_str("Key(***)"),
            Self::Token(_) => f.write_str("Token(***)"),
        }
    }
}

impl Credential {
    fn secret(&self) -> &str {
        match self {
            Self::Key(secret) | Self::Token(secret) => secret,
        }
    }
}

/// Connection options for one database account.
///
/// Options double as the connection cache key: two values that compare equal
/// share a connection handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionOptions {
    /// Account endpoint URL
    pub account_endpoint: String,

    /// Key or token credential
    pub credential: Credential,

    /// Database used when a binding does not name one
    pub database_name: String,

    /// Throughput provisioned when the database is created
    pub database_throughput: u32,

    /// Upper bound on continuation token size, in KB
    pub continuation_token_limit_kb: Option<u32>,

    /// Settings applied when writing documents
    pub serializer: SerializerOptions,
}

impl ConnectionOptions {
    pub fn new(account_endpoint: &str, credential: Credential) -> Self {
        Self {
            account_endpoint: account_endpoint.to_string(),
            credential,
            database_name: "default".to_string(),
            database_throughput: DEFAULT_DATABASE_THROUGHPUT,
            continuation_token_limit_kb: None,
            serializer: SerializerOptions::default(),
        }
    }

    /// Options for the local emulator with the given well-known key.
    pub fn emulator(account_key: &str) -> Self {
        Self::new(EMULATOR_ENDPOINT, Credential::Key(account_key.to_string()))
    }

    /// Set the default database name
    pub fn database(mut self, database: &str) -> Self {
        self.database_name = database.to_string();
        self
    }

    /// Set the provisioned database throughput
    pub fn database_throughput(mut self, throughput: u32) -> Self {
        self.database_throughput = throughput;
        self
    }

    /// Cap continuation tokens returned by queries
    pub fn continuation_token_limit_kb(mut self, limit: u32) -> Self {
        self.continuation_token_limit_kb = Some(limit);
        self
    }

    pub fn serializer(mut self, serializer: SerializerOptions) -> Self {
        self.serializer = serializer;
        self
    }

    /// Parse from a connection string
    ///
    /// Format: `AccountEndpoint=https://host:443/;AccountKey=...;Database=mydb`.
    /// `AccessToken=` may stand in for `AccountKey=`.
    ///
    /// # Examples
    ///
    /// ```
    /// use docbind::ConnectionOptions;
    ///
    /// let options = ConnectionOptions::from_connection_string(
    ///     "AccountEndpoint=https://acct.example.com:443/;AccountKey=c2VjcmV0;Database=shop",
    /// ).unwrap();
    /// assert_eq!(options.database_name, "shop");
    /// ```
    pub fn from_connection_string(value: &str) -> Result<Self> {
        let mut endpoint = None;
        let mut credential = None;
        let mut database = None;
        let mut throughput = None;

        for part in value.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, val) = part.split_once('=').ok_or_else(|| {
                DocError::InvalidConfig(format!("Malformed connection string segment '{part}'"))
            })?;
            match key.to_ascii_lowercase().as_str() {
                "accountendpoint" => endpoint = Some(val.to_string()),
                "accountkey" => credential = Some(Credential::Key(val.to_string())),
                "accesstoken" => credential = Some(Credential::Token(val.to_string())),
                "database" => database = Some(val.to_string()),
                "databasethroughput" => {
                    throughput = Some(val.parse::<u32>().map_err(|_| {
                        DocError::InvalidConfig(format!("Invalid DatabaseThroughput '{val}'"))
                    })?)
                }
                other => {
                    return Err(DocError::InvalidConfig(format!(
                        "Unknown connection string key '{other}'"
                    )));
                }
            }
        }

        let endpoint = endpoint.ok_or_else(|| {
            DocError::InvalidConfig("Connection string is missing AccountEndpoint".into())
        })?;
        let credential = credential.ok_or_else(|| {
            DocError::InvalidConfig(
                "Connection string needs AccountKey or AccessToken".into(),
            )
        })?;

        let mut options = Self::new(&endpoint, credential);
        if let Some(database) = database {
            options = options.database(&database);
        }
        if let Some(throughput) = throughput {
            options = options.database_throughput(throughput);
        }
        options.validate()?;
        Ok(options)
    }

    /// Convert to a connection string with the secret masked
    pub fn to_connection_string(&self) -> String {
        let credential_key = match self.credential {
            Credential::Key(_) => "AccountKey",
            Credential::Token(_) => "AccessToken",
        };
        format!(
            "AccountEndpoint={};{}=***;Database={}",
            self.account_endpoint, credential_key, self.database_name
        )
    }

    /// Host portion of the endpoint, if it parses as a URL.
    pub fn endpoint_host(&self) -> Option<String> {
        url::Url::parse(&self.account_endpoint)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.account_endpoint).map_err(|e| {
            DocError::InvalidConfig(format!(
                "Invalid account endpoint '{}': {e}",
                self.account_endpoint
            ))
        })?;
        if parsed.host_str().is_none() {
            return Err(DocError::InvalidConfig(format!(
                "Account endpoint '{}' has no host",
                self.account_endpoint
            )));
        }

        if self.credential.secret().is_empty() {
            return Err(DocError::InvalidConfig("Credential cannot be empty".into()));
        }

        if self.database_name.is_empty() {
            return Err(DocError::InvalidConfig("Database name cannot be empty".into()));
        }

        if self.database_throughput == 0 {
            return Err(DocError::InvalidConfig(
                "database_throughput must be > 0".into(),
            ));
        }

        if self.continuation_token_limit_kb == Some(0) {
            return Err(DocError::InvalidConfig(
                "continuation_token_limit_kb must be > 0 when set".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_pattern() {
        let options = ConnectionOptions::new("https://acct.example.com/", Credential::Key("k".into()))
            .database("shop")
            .database_throughput(4000)
            .continuation_token_limit_kb(2);

        assert_eq!(options.database_name, "shop");
        assert_eq!(options.database_throughput, 4000);
        assert_eq!(options.continuation_token_limit_kb, Some(2));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let options = ConnectionOptions::emulator("key");
        assert_eq!(options.database_throughput, 1000);
        assert_eq!(options.continuation_token_limit_kb, None);
        assert_eq!(options.endpoint_host().as_deref(), Some("localhost"));
    }

    #[test]
    fn test_from_connection_string_with_token() {
        let options = ConnectionOptions::from_connection_string(
            "AccountEndpoint=https://acct.example.com:443/;AccessToken=abc;DatabaseThroughput=400",
        )
        .unwrap();

        assert_eq!(options.credential, Credential::Token("abc".into()));
        assert_eq!(options.database_throughput, 400);
        assert_eq!(options.database_name, "default");
    }

    #[test]
    fn test_invalid_connection_string() {
        assert!(ConnectionOptions::from_connection_string("AccountKey=abc").is_err());
        assert!(
            ConnectionOptions::from_connection_string("AccountEndpoint=https://a.com/").is_err()
        );
        assert!(ConnectionOptions::from_connection_string("garbage").is_err());
        assert!(
            ConnectionOptions::from_connection_string(
                "AccountEndpoint=https://a.com/;AccountKey=k;Color=blue"
            )
            .is_err()
        );
    }

    #[test]
    fn test_validate() {
        let valid = ConnectionOptions::emulator("key");
        assert!(valid.validate().is_ok());

        let empty_key = ConnectionOptions::emulator("");
        assert!(empty_key.validate().is_err());

        let bad_endpoint = ConnectionOptions::new("not a url", Credential::Key("k".into()));
        assert!(bad_endpoint.validate().is_err());

        let zero_throughput = ConnectionOptions::emulator("key").database_throughput(0);
        assert!(zero_throughput.validate().is_err());
    }

    #[test]
    fn test_to_connection_string_hides_secret() {
        let options = ConnectionOptions::emulator("secret123").database("shop");
        let value = options.to_connection_string();
        assert!(!value.contains("secret123"));
        assert!(value.contains("AccountKey=***"));
        assert!(format!("{options:?}").contains("Key(***)"));
    }
}
