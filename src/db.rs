use diesel::pg::Pg;
use diesel::pg::upsert::excluded;
use diesel::prelude::*;

use crate::models;

/// Inserts a creation record, or refreshes the token, stream and referral of an
/// existing creator. `created_at` and `total_transfers` are left alone on conflict.
pub fn upsert_creation(
  conn: &PgConnection,
  new_creation: models::NewCreation,
) -> Result<(), diesel::result::Error> {
  use crate::schema::creations::dsl::*;

  diesel::insert_into(creations)
    .values(&new_creation)
    .on_conflict(creator_address)
    .do_update()
    .set((
      created_token.eq(excluded(created_token)),
      stream_id.eq(excluded(stream_id)),
      referral.eq(excluded(referral)),
      updated_at.eq(excluded(updated_at)),
    ))
    .execute(conn)?;

  Ok(())
}

pub fn get_creation(
  conn: &PgConnection,
  creator: &str,
) -> Result<Option<models::Creation>, diesel::result::Error> {
  use crate::schema::creations::dsl::*;

  creations
    .filter(creator_address.eq(creator))
    .first::<models::Creation>(conn)
    .optional()
}

/// Bumps the transfer counter of the creation that minted `token`.
pub fn increment_transfer_count(
  conn: &PgConnection,
  token: &str,
  timestamp: i64,
) -> Result<usize, diesel::result::Error> {
  use crate::schema::creations::dsl::*;

  diesel::update(creations.filter(created_token.eq(token)))
    .set((total_transfers.eq(total_transfers + 1), updated_at.eq(timestamp)))
    .execute(conn)
}

pub fn track_token(
  conn: &PgConnection,
  token: models::TrackedToken,
) -> Result<(), diesel::result::Error> {
  use crate::schema::tracked_tokens::dsl::*;

  diesel::insert_into(tracked_tokens)
    .values(&token)
    .on_conflict(token_address)
    .do_nothing()
    .execute(conn)?;

  Ok(())
}

pub fn tracked_tokens(conn: &PgConnection) -> Result<Vec<String>, diesel::result::Error> {
  use crate::schema::tracked_tokens::dsl::*;

  tracked_tokens
    .select(token_address)
    .order(first_seen_block.asc())
    .load::<String>(conn)
}

/// Copies every created token into `tracked_tokens`. Tokens seen before the table
/// existed have no first-seen block and are stored at 0.
pub fn seed_tracked_tokens(conn: &PgConnection) -> Result<usize, diesel::result::Error> {
  diesel::sql_query("
    INSERT INTO tracked_tokens (token_address, creator_address, first_seen_block)
    SELECT created_token, creator_address, 0
    FROM creations
    ON CONFLICT (token_address) DO NOTHING
  ").execute(conn)
}

pub fn get_balance(
  conn: &PgConnection,
  token: &str,
  holder: &str,
) -> Result<Option<String>, diesel::result::Error> {
  use crate::schema::holders::dsl::*;

  holders
    .filter(holder_address.eq(holder))
    .filter(token_address.eq(token))
    .select(balance)
    .first::<String>(conn)
    .optional()
}

pub fn upsert_balance(
  conn: &PgConnection,
  new_holder: models::NewHolder,
) -> Result<(), diesel::result::Error> {
  use crate::schema::holders::dsl::*;

  diesel::insert_into(holders)
    .values(&new_holder)
    .on_conflict((holder_address, token_address))
    .do_update()
    .set((balance.eq(excluded(balance)), updated_at.eq(excluded(updated_at))))
    .execute(conn)?;

  Ok(())
}

pub fn delete_balance(
  conn: &PgConnection,
  token: &str,
  holder: &str,
) -> Result<usize, diesel::result::Error> {
  use crate::schema::holders::dsl::*;

  diesel::delete(holders.filter(holder_address.eq(holder)).filter(token_address.eq(token)))
    .execute(conn)
}

pub fn get_rollup_balance(
  conn: &PgConnection,
  chain: i64,
  token: &str,
  holder: &str,
) -> Result<Option<String>, diesel::result::Error> {
  use crate::schema::rollup_holders::dsl::*;

  rollup_holders
    .filter(chain_id.eq(chain))
    .filter(l2_token.eq(token))
    .filter(holder_address.eq(holder))
    .select(balance)
    .first::<String>(conn)
    .optional()
}

pub fn upsert_rollup_balance(
  conn: &PgConnection,
  new_holder: models::NewRollupHolder,
) -> Result<(), diesel::result::Error> {
  use crate::schema::rollup_holders::dsl::*;

  diesel::insert_into(rollup_holders)
    .values(&new_holder)
    .on_conflict((chain_id, l2_token, holder_address))
    .do_update()
    .set((balance.eq(excluded(balance)), updated_at.eq(excluded(updated_at))))
    .execute(conn)?;

  Ok(())
}

pub fn delete_rollup_balance(
  conn: &PgConnection,
  chain: i64,
  token: &str,
  holder: &str,
) -> Result<usize, diesel::result::Error> {
  use crate::schema::rollup_holders::dsl::*;

  diesel::delete(
    rollup_holders
      .filter(chain_id.eq(chain))
      .filter(l2_token.eq(token))
      .filter(holder_address.eq(holder))
  ).execute(conn)
}

pub fn mark_block_processed(
  conn: &PgConnection,
  block: models::NewProcessedBlock,
) -> Result<(), diesel::result::Error> {
  use crate::schema::processed_blocks::dsl::*;

  diesel::insert_into(processed_blocks)
    .values(&block)
    .on_conflict(block_number)
    .do_update()
    .set(processed_at.eq(excluded(processed_at)))
    .execute(conn)?;

  Ok(())
}

pub fn last_processed_block(conn: &PgConnection) -> Result<Option<i64>, diesel::result::Error> {
  use crate::schema::processed_blocks::dsl::*;

  processed_blocks
    .select(diesel::dsl::max(block_number))
    .first::<Option<i64>>(conn)
}

pub fn block_processed(
  conn: &PgConnection,
  number: i64,
) -> Result<bool, diesel::result::Error> {
  use crate::schema::processed_blocks::dsl::*;

  diesel::select(diesel::dsl::exists(processed_blocks.filter(block_number.eq(number))))
    .get_result(conn)
}

pub fn mark_rollup_block_processed(
  conn: &PgConnection,
  block: models::NewRollupProcessedBlock,
) -> Result<(), diesel::result::Error> {
  use crate::schema::rollup_processed_blocks::dsl::*;

  diesel::insert_into(rollup_processed_blocks)
    .values(&block)
    .on_conflict((chain_id, block_number))
    .do_update()
    .set(processed_at.eq(excluded(processed_at)))
    .execute(conn)?;

  Ok(())
}

pub fn last_rollup_block(
  conn: &PgConnection,
  chain: i64,
) -> Result<Option<i64>, diesel::result::Error> {
  use crate::schema::rollup_processed_blocks::dsl::*;

  rollup_processed_blocks
    .filter(chain_id.eq(chain))
    .select(diesel::dsl::max(block_number))
    .first::<Option<i64>>(conn)
}

pub fn rollup_block_processed(
  conn: &PgConnection,
  chain: i64,
  number: i64,
) -> Result<bool, diesel::result::Error> {
  use crate::schema::rollup_processed_blocks::dsl::*;

  diesel::select(diesel::dsl::exists(
    rollup_processed_blocks.filter(chain_id.eq(chain)).filter(block_number.eq(number))
  )).get_result(conn)
}

/// Records a base token -> rollup token mapping. The latest deployment event wins.
pub fn upsert_deployment(
  conn: &PgConnection,
  deployment: &models::Deployment,
) -> Result<(), diesel::result::Error> {
  use crate::schema::rollup_deployments::dsl::*;

  diesel::insert_into(rollup_deployments)
    .values(deployment)
    .on_conflict((l1_token, chain_id))
    .do_update()
    .set((
      l2_token.eq(excluded(l2_token)),
      deployer.eq(excluded(deployer)),
      salt.eq(excluded(salt)),
      created_at.eq(excluded(created_at)),
    ))
    .execute(conn)?;

  Ok(())
}

pub fn rollup_tokens(
  conn: &PgConnection,
  chain: i64,
) -> Result<Vec<String>, diesel::result::Error> {
  use crate::schema::rollup_deployments::dsl::*;

  rollup_deployments
    .filter(chain_id.eq(chain))
    .select(l2_token)
    .distinct()
    .load::<String>(conn)
}

pub fn record_rollup_transfer(
  conn: &PgConnection,
  transfer: &models::RollupTransfer,
) -> Result<(), diesel::result::Error> {
  use crate::schema::rollup_transfers::dsl::*;

  diesel::insert_into(rollup_transfers)
    .values(transfer)
    .on_conflict((chain_id, tx_hash, from_address, to_address))
    .do_update()
    .set((
      amount.eq(excluded(amount)),
      block_timestamp.eq(excluded(block_timestamp)),
      created_at.eq(excluded(created_at)),
    ))
    .execute(conn)?;

  Ok(())
}

pub fn upsert_pair(
  conn: &PgConnection,
  pair: &models::Pair,
) -> Result<(), diesel::result::Error> {
  use crate::schema::pairs::dsl::*;

  diesel::insert_into(pairs)
    .values(pair)
    .on_conflict(pair_address)
    .do_update()
    .set((
      token0.eq(excluded(token0)),
      token1.eq(excluded(token1)),
      reserve0.eq(excluded(reserve0)),
      reserve1.eq(excluded(reserve1)),
      price.eq(excluded(price)),
      updated_at.eq(excluded(updated_at)),
    ))
    .execute(conn)?;

  Ok(())
}

/// Creation records, newest first, optionally for a single creator.
pub fn fetch_creations(
  conn: &PgConnection,
  creator: Option<&String>,
) -> Result<Vec<models::Creation>, diesel::result::Error> {
  use crate::schema::creations::dsl::*;

  let mut query = creations.into_boxed::<Pg>();

  if let Some(creator) = creator {
    query = query.filter(creator_address.eq(creator));
  }

  query
    .order(created_at.desc())
    .load::<models::Creation>(conn)
}

/// Top `limit` holders of each of `tokens`, largest balance first.
pub fn fetch_top_holders(
  conn: &PgConnection,
  tokens: Vec<String>,
  limit: i64,
) -> Result<Vec<models::Holder>, diesel::result::Error> {
  if tokens.is_empty() {
    return Ok(vec![])
  }

  let query = diesel::sql_query("
    SELECT holder_address, token_address, balance, updated_at
    FROM (
      SELECT *, row_number() OVER (PARTITION BY token_address ORDER BY CAST(balance AS NUMERIC) DESC) AS rank
      FROM holders
      WHERE token_address = ANY($1)
    ) ranked
    WHERE rank <= $2
    ORDER BY token_address, CAST(balance AS NUMERIC) DESC
  ")
    .bind::<diesel::sql_types::Array<diesel::sql_types::Text>, _>(tokens)
    .bind::<diesel::sql_types::BigInt, _>(limit);

  query.load::<models::Holder>(conn)
}

pub fn fetch_pairs(
  conn: &PgConnection,
  address: Option<&String>,
) -> Result<Vec<models::Pair>, diesel::result::Error> {
  use crate::schema::pairs::dsl::*;

  let mut query = pairs.into_boxed::<Pg>();

  if let Some(address) = address {
    query = query.filter(pair_address.eq(address));
  }

  query
    .order(updated_at.desc())
    .load::<models::Pair>(conn)
}

/// Deployments of one base token, or the most recent `limit` across all tokens.
pub fn fetch_deployments(
  conn: &PgConnection,
  base_token: Option<&String>,
  limit: i64,
) -> Result<Vec<models::Deployment>, diesel::result::Error> {
  use crate::schema::rollup_deployments::dsl::*;

  let mut query = rollup_deployments.into_boxed::<Pg>();

  match base_token {
    Some(token) => query = query.filter(l1_token.eq(token)),
    None => query = query.limit(limit),
  }

  query
    .order(created_at.desc())
    .load::<models::Deployment>(conn)
}

pub fn fetch_salt(
  conn: &PgConnection,
  base_token: &str,
) -> Result<Option<String>, diesel::result::Error> {
  use crate::schema::rollup_deployments::dsl::*;

  rollup_deployments
    .filter(l1_token.eq(base_token))
    .select(salt)
    .first::<String>(conn)
    .optional()
}
