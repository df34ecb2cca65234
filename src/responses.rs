use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HolderView {
  pub holder_address: String,
  pub balance: String,
  pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct CreationWithHolders {
  #[serde(flatten)]
  pub creation: models::Creation,
  pub holders: Vec<HolderView>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SaltResponse {
  pub salt: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
  pub error: String,
}

/// Attaches holders to the creation of the token they hold, keeping the
/// order both lists arrive in.
pub fn with_holders(creations: Vec<models::Creation>, holders: Vec<models::Holder>) -> Vec<CreationWithHolders> {
  let mut by_token: HashMap<String, Vec<HolderView>> = HashMap::new();
  for holder in holders {
    by_token.entry(holder.token_address).or_insert_with(Vec::new).push(HolderView {
      holder_address: holder.holder_address,
      balance: holder.balance,
      updated_at: holder.updated_at,
    });
  }

  creations.into_iter()
    .map(|creation| {
      let holders = by_token.get(&creation.created_token).cloned().unwrap_or_default();
      CreationWithHolders { creation, holders }
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn creation(creator: &str, token: &str) -> models::Creation {
    models::Creation {
      creator_address: creator.to_string(),
      created_token: token.to_string(),
      stream_id: 1,
      referral: None,
      created_at: 10,
      updated_at: 10,
      total_transfers: 0,
    }
  }

  fn holder(holder: &str, token: &str, balance: &str) -> models::Holder {
    models::Holder {
      holder_address: holder.to_string(),
      token_address: token.to_string(),
      balance: balance.to_string(),
      updated_at: 11,
    }
  }

  #[test]
  fn groups_holders_under_their_token() {
    let grouped = with_holders(
      vec![creation("0xc1", "0xt1"), creation("0xc2", "0xt2")],
      vec![holder("0xa", "0xt1", "900"), holder("0xb", "0xt1", "100")],
    );

    assert_eq!(grouped.len(), 2);
    let balances: Vec<&str> = grouped[0].holders.iter().map(|h| h.balance.as_str()).collect();
    assert_eq!(balances, vec!["900", "100"]);
    assert!(grouped[1].holders.is_empty());
  }

  #[test]
  fn flattens_creation_fields() {
    let grouped = with_holders(vec![creation("0xc1", "0xt1")], vec![holder("0xa", "0xt1", "5")]);
    let json = serde_json::to_value(&grouped[0]).unwrap();

    assert_eq!(json["creator_address"], "0xc1");
    assert_eq!(json["total_transfers"], 0);
    assert_eq!(json["holders"][0]["holder_address"], "0xa");
  }
}
