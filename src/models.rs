use serde::{Serialize};

use crate::schema::{
  creations, holders, pairs, processed_blocks, tracked_tokens,
  rollup_deployments, rollup_processed_blocks, rollup_transfers, rollup_holders,
};

#[derive(Queryable, Serialize, Debug, Clone, PartialEq)]
pub struct Creation {
  pub creator_address: String,
  pub created_token: String,
  pub stream_id: i64,
  pub referral: Option<String>,
  pub created_at: i64,
  pub updated_at: i64,
  pub total_transfers: i64,
}

#[derive(Insertable, Debug)]
#[table_name = "creations"]
pub struct NewCreation<'a> {
  pub creator_address: &'a str,
  pub created_token: &'a str,
  pub stream_id: i64,
  pub referral: Option<&'a str>,
  pub created_at: i64,
  pub updated_at: i64,
  pub total_transfers: i64,
}

#[derive(Queryable, QueryableByName, Serialize, Debug, Clone, PartialEq)]
#[table_name = "holders"]
pub struct Holder {
  pub holder_address: String,
  pub token_address: String,
  pub balance: String,
  pub updated_at: i64,
}

#[derive(Insertable, Debug)]
#[table_name = "holders"]
pub struct NewHolder<'a> {
  pub holder_address: &'a str,
  pub token_address: &'a str,
  pub balance: String,
  pub updated_at: i64,
}

#[derive(Queryable, Insertable, Serialize, Debug, Clone, PartialEq)]
#[table_name = "pairs"]
pub struct Pair {
  pub pair_address: String,
  pub token0: String,
  pub token1: String,
  pub reserve0: String,
  pub reserve1: String,
  pub price: String,
  pub updated_at: i64,
}

#[derive(Insertable, Debug)]
#[table_name = "processed_blocks"]
pub struct NewProcessedBlock {
  pub block_number: i64,
  pub processed_at: i64,
}

#[derive(Queryable, Insertable, Debug, Clone, PartialEq)]
#[table_name = "tracked_tokens"]
pub struct TrackedToken {
  pub token_address: String,
  pub creator_address: String,
  pub first_seen_block: i64,
}

#[derive(Queryable, Insertable, Serialize, Debug, Clone, PartialEq)]
#[table_name = "rollup_deployments"]
pub struct Deployment {
  pub l1_token: String,
  pub chain_id: i64,
  pub l2_token: String,
  pub deployer: String,
  pub salt: String,
  pub created_at: i64,
}

#[derive(Insertable, Debug)]
#[table_name = "rollup_processed_blocks"]
pub struct NewRollupProcessedBlock {
  pub chain_id: i64,
  pub block_number: i64,
  pub processed_at: i64,
}

#[derive(Queryable, Insertable, Debug, Clone, PartialEq)]
#[table_name = "rollup_transfers"]
pub struct RollupTransfer {
  pub chain_id: i64,
  pub l2_token: String,
  pub from_address: String,
  pub to_address: String,
  pub amount: String,
  pub tx_hash: String,
  pub block_number: i64,
  pub block_timestamp: i64,
  pub created_at: i64,
}

#[derive(Insertable, Debug)]
#[table_name = "rollup_holders"]
pub struct NewRollupHolder<'a> {
  pub chain_id: i64,
  pub l2_token: &'a str,
  pub holder_address: &'a str,
  pub balance: String,
  pub updated_at: i64,
}
