use thiserror::Error;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Errors raised while fetching chain data or persisting derived state.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("http error: {0}")]
  Http(reqwest::Error),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
  #[error("database error: {0}")]
  Db(#[from] diesel::result::Error),
  #[error("connection pool error: {0}")]
  Pool(#[from] diesel::r2d2::PoolError),
  #[error("rpc error {code}: {message}")]
  Rpc { code: i64, message: String },
  #[error("abi error: {0}")]
  Abi(String),
  #[error("abi decoding failed: {0}")]
  Decode(#[from] ethabi::Error),
  #[error("missing data: {0}")]
  MissingData(String),
  #[error("timed out: {0}")]
  Timeout(String),
  #[error("invalid config: {0}")]
  Config(String),
}

impl FetchError {
  /// Whether retrying the same call later can reasonably succeed.
  //  node-side rejections (reverts, bad params) and malformed data are permanent.
  pub fn is_transient(&self) -> bool {
    match self {
      FetchError::Http(_) | FetchError::Timeout(_) | FetchError::Pool(_) | FetchError::Db(_) => true,
      FetchError::Rpc { code, message } => is_rate_limited(*code, message),
      FetchError::Json(_) | FetchError::Abi(_) | FetchError::Decode(_)
        | FetchError::MissingData(_) | FetchError::Config(_) => false,
    }
  }

  pub fn is_revert(&self) -> bool {
    match self {
      FetchError::Rpc { code, message } => {
        *code == 3 || message.to_lowercase().contains("revert") || message.to_lowercase().contains("invalid opcode")
      },
      _ => false,
    }
  }
}

fn is_rate_limited(code: i64, message: &str) -> bool {
  let message = message.to_lowercase();
  code == 429 || code == -32005 || message.contains("rate limit") || message.contains("too many requests")
}

// timeouts are classified separately from other transport failures
impl From<reqwest::Error> for FetchError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      FetchError::Timeout(e.to_string())
    } else {
      FetchError::Http(e)
    }
  }
}

/// Lowercases and validates a `0x`-prefixed 20 byte hex address.
pub fn normalize_address(address: &str) -> Result<String, FetchError> {
  let trimmed = address.trim();
  let body = trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X"))
    .ok_or_else(|| FetchError::MissingData(format!("address without 0x prefix: {}", address)))?;
  if body.len() != 40 || hex::decode(body).is_err() {
    return Err(FetchError::MissingData(format!("malformed address: {}", address)))
  }
  Ok(format!("0x{}", body.to_lowercase()))
}

pub fn is_zero_address(address: &str) -> bool {
  address.eq_ignore_ascii_case(ZERO_ADDRESS)
}

/// Parses a quantity such as `0x1b4` as returned by the node.
pub fn parse_hex_u64(quantity: &str) -> Result<u64, FetchError> {
  let body = quantity.strip_prefix("0x").unwrap_or(quantity);
  if body.is_empty() {
    return Ok(0)
  }
  u64::from_str_radix(body, 16)
    .map_err(|_| FetchError::MissingData(format!("invalid hex quantity {}", quantity)))
}

pub fn to_hex_quantity(value: u64) -> String {
  format!("{:#x}", value)
}

pub fn unix_now() -> i64 {
  chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalizes_checksummed_addresses() {
    let address = normalize_address("0x05208B8beEc0A684c16412fa5b65134A5Aba09bD").unwrap();
    assert_eq!(address, "0x05208b8beec0a684c16412fa5b65134a5aba09bd");
  }

  #[test]
  fn rejects_short_or_unprefixed_addresses() {
    assert!(normalize_address("0x1234").is_err());
    assert!(normalize_address("05208b8beec0a684c16412fa5b65134a5aba09bd").is_err());
    assert!(normalize_address("0xzz208b8beec0a684c16412fa5b65134a5aba09bd").is_err());
  }

  #[test]
  fn parses_quantities() {
    assert_eq!(parse_hex_u64("0x0").unwrap(), 0);
    assert_eq!(parse_hex_u64("0x80a4df").unwrap(), 8430815);
    assert_eq!(to_hex_quantity(8430815), "0x80a4df");
    assert!(parse_hex_u64("0xnope").is_err());
  }

  #[test]
  fn classifies_errors() {
    let revert = FetchError::Rpc { code: 3, message: "execution reverted".into() };
    assert!(revert.is_revert());
    assert!(!revert.is_transient());

    let limited = FetchError::Rpc { code: 429, message: "Too Many Requests".into() };
    assert!(limited.is_transient());
    assert!(FetchError::Timeout("eth_call".into()).is_transient());
    assert!(!FetchError::MissingData("topics".into()).is_transient());
  }

  #[test]
  fn wraps_library_errors() {
    let json: FetchError = serde_json::from_str::<u64>("nope").unwrap_err().into();
    assert!(matches!(json, FetchError::Json(_)));
    assert!(json.to_string().starts_with("json error: "));

    let db: FetchError = diesel::result::Error::NotFound.into();
    assert!(db.to_string().starts_with("database error: "));
    assert!(db.is_transient());

    let rpc = FetchError::Rpc { code: -32000, message: "header not found".into() };
    assert_eq!(rpc.to_string(), "rpc error -32000: header not found");
    assert!(!rpc.is_revert());
  }
}
