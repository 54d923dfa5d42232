//! Command Line Interface (CLI) arguments.

use clap::Parser;
use url::Url;

use crate::envelope::{BinMark, BinSpacing, EnvelopeOptions, DEFAULT_BIN_COUNT};
use crate::models::{SessionConfig, TokenType, DEFAULT_CONCURRENCY, DEFAULT_DOMAIN, DEFAULT_PAGE_SIZE};

/// IOTile analytics command line interface
///
/// Fetches every page of a cloud resource and prints the records as JSON, or their min/max
/// envelope when `--envelope` is given.
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// Base URL of the cloud server
    #[arg(long, default_value = DEFAULT_DOMAIN, env = "IOTILE_DOMAIN")]
    pub domain: Url,
    /// Authentication token
    #[arg(long, env = "IOTILE_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    /// Type of the authentication token (jwt or a-jwt)
    #[arg(long, default_value_t = TokenType::Jwt, env = "IOTILE_TOKEN_TYPE")]
    pub token_type: TokenType,
    /// User the token belongs to
    #[arg(long, env = "IOTILE_USER")]
    pub user: Option<String>,
    /// Maximum number of requests in flight
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY, env = "IOTILE_CONCURRENCY")]
    pub concurrency: usize,
    /// Skip verification of the server's TLS certificate
    #[arg(long, default_value_t = false, env = "IOTILE_INSECURE")]
    pub insecure: bool,
    /// Disable the response cache
    #[arg(long, default_value_t = false, env = "IOTILE_NO_CACHE")]
    pub no_cache: bool,
    /// API resource to fetch, relative to /api/v1/
    #[arg(long, env = "IOTILE_RESOURCE")]
    pub resource: String,
    /// Value of the `filter` query parameter
    #[arg(long, env = "IOTILE_FILTER")]
    pub filter: Option<String>,
    /// Number of records per page
    #[arg(long, default_value_t = DEFAULT_PAGE_SIZE, env = "IOTILE_PAGE_SIZE")]
    pub page_size: usize,
    /// Print the min/max envelope of the records instead of the records
    #[arg(long, default_value_t = false, env = "IOTILE_ENVELOPE")]
    pub envelope: bool,
    /// Record field holding the x coordinate
    #[arg(long, default_value = "x", env = "IOTILE_X_FIELD")]
    pub x_field: String,
    /// Record field holding the y coordinate
    #[arg(long, default_value = "value", env = "IOTILE_Y_FIELD")]
    pub y_field: String,
    /// Number of envelope bins
    #[arg(long, default_value_t = DEFAULT_BIN_COUNT, env = "IOTILE_BIN_COUNT")]
    pub bin_count: usize,
    /// Spacing of envelope bins (linear or log)
    #[arg(long, default_value_t = BinSpacing::Linear, env = "IOTILE_BIN_SPACING")]
    pub bin_spacing: BinSpacing,
    /// Position of each bin's x marker (left, right or center)
    #[arg(long, default_value_t = BinMark::Center, env = "IOTILE_BIN_MARK")]
    pub bin_mark: BinMark,
}

impl CommandLineArgs {
    /// Session configuration described by these arguments.
    ///
    /// The result is validated when the session is opened.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            domain: self.domain.clone(),
            token: self.token.clone(),
            token_type: self.token_type,
            user: self.user.clone(),
            concurrency: self.concurrency,
            verify: !self.insecure,
            cache_enabled: !self.no_cache,
        }
    }

    /// Envelope options described by these arguments.
    pub fn envelope_options(&self) -> EnvelopeOptions {
        EnvelopeOptions {
            bin_count: self.bin_count,
            bin_spacing: self.bin_spacing,
            bin_mark: self.bin_mark,
        }
    }
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
