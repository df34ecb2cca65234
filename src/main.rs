//! Read API over the indexed ledger, plus the background indexer.
//!
//! Handlers run their Diesel queries inside `web::block` so the async server
//! threads never wait on Postgres. Chain indexing runs on actix SyncArbiter
//! threads (see `worker`).

#[macro_use]
extern crate diesel;

#[macro_use]
extern crate diesel_migrations;
embed_migrations!();

#[macro_use]
extern crate log;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{get, web, App, Error, HttpResponse, HttpServer, Responder};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager};

mod abi;
mod balances;
mod config;
mod constants;
mod db;
mod l1;
mod ledger;
mod models;
mod pairs;
mod responses;
mod rollup;
mod rpc;
mod schema;
mod utils;
mod worker;

use crate::config::IndexerConfig;
use crate::constants::{HOLDERS_PER_RECORD, RECENT_DEPLOYMENTS};
use crate::ledger::DbPool;
use crate::responses::{CreationWithHolders, ErrorResponse, SaltResponse};

fn not_found(what: String) -> HttpResponse {
  HttpResponse::NotFound().json(ErrorResponse { error: what })
}

fn internal_error<E: std::fmt::Display>(e: E) -> HttpResponse {
  error!("{}", e);
  HttpResponse::InternalServerError().finish()
}

/// Creation records with their largest holders.
fn load_creations(
  conn: &PgConnection,
  creator: Option<&String>,
) -> Result<Vec<CreationWithHolders>, diesel::result::Error> {
  let creations = db::fetch_creations(conn, creator)?;
  let tokens = creations.iter().map(|c| c.created_token.clone()).collect();
  let holders = db::fetch_top_holders(conn, tokens, HOLDERS_PER_RECORD)?;
  Ok(responses::with_holders(creations, holders))
}

/// Test endpoint.
#[get("/")]
async fn hello() -> impl Responder {
  HttpResponse::Ok().body("Hello altar!")
}

/// Gets all creation records, newest first.
#[get("/api/blesed")]
async fn get_creations(
  pool: web::Data<DbPool>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;

  // use web::block to offload blocking Diesel code without blocking server thread
  let records = web::block(move || load_creations(&conn, None))
    .await
    .map_err(internal_error)?;

  Ok(HttpResponse::Ok().json(records))
}

/// Gets the creation record of one creator.
#[get("/api/blesed/{address}")]
async fn get_creator(
  pool: web::Data<DbPool>,
  web::Path(address): web::Path<String>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;
  let address = address.to_lowercase();

  let lookup = address.clone();
  let records = web::block(move || load_creations(&conn, Some(&lookup)))
    .await
    .map_err(internal_error)?;

  if records.is_empty() {
    return Ok(not_found(format!("no creations by {}", address)))
  }
  Ok(HttpResponse::Ok().json(records))
}

/// Gets all pair snapshots, most recently refreshed first.
#[get("/api/pairs")]
async fn get_pairs(
  pool: web::Data<DbPool>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;

  let pairs = web::block(move || db::fetch_pairs(&conn, None))
    .await
    .map_err(internal_error)?;

  Ok(HttpResponse::Ok().json(pairs))
}

#[get("/api/pairs/{address}")]
async fn get_pair(
  pool: web::Data<DbPool>,
  web::Path(address): web::Path<String>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;
  let address = address.to_lowercase();

  let lookup = address.clone();
  let pairs = web::block(move || db::fetch_pairs(&conn, Some(&lookup)))
    .await
    .map_err(internal_error)?;

  if pairs.is_empty() {
    return Ok(not_found(format!("no pair at {}", address)))
  }
  Ok(HttpResponse::Ok().json(pairs))
}

/// Gets the most recent rollup deployments.
#[get("/api/superbles")]
async fn get_deployments(
  pool: web::Data<DbPool>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;

  let deployments = web::block(move || db::fetch_deployments(&conn, None, RECENT_DEPLOYMENTS))
    .await
    .map_err(internal_error)?;

  Ok(HttpResponse::Ok().json(deployments))
}

/// Gets the rollup deployments of one base token.
#[get("/api/superbles/{l1_token}")]
async fn get_token_deployments(
  pool: web::Data<DbPool>,
  web::Path(l1_token): web::Path<String>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;
  let l1_token = l1_token.to_lowercase();

  let deployments = web::block(move || db::fetch_deployments(&conn, Some(&l1_token), RECENT_DEPLOYMENTS))
    .await
    .map_err(internal_error)?;

  Ok(HttpResponse::Ok().json(deployments))
}

#[get("/api/superbles/{l1_token}/salt")]
async fn get_salt(
  pool: web::Data<DbPool>,
  web::Path(l1_token): web::Path<String>,
) -> Result<HttpResponse, Error> {
  let conn = pool.get().map_err(internal_error)?;
  let l1_token = l1_token.to_lowercase();

  let lookup = l1_token.clone();
  let salt = web::block(move || db::fetch_salt(&conn, &lookup))
    .await
    .map_err(internal_error)?;

  match salt {
    Some(salt) => Ok(HttpResponse::Ok().json(SaltResponse { salt })),
    None => Ok(not_found(format!("no deployment of {}", l1_token))),
  }
}

/// Logs what block `number` contains, for operators chasing a missing event.
async fn check_block(config: &IndexerConfig, number: u64) {
  let config = config.clone();
  let result = web::block(move || {
    let client = rpc::EthClient::new(config.network.chain_id(), &config.l1_rpc_url);
    let processor = l1::L1Processor::new(
      client,
      &config.protocol_address,
      config.reward_token.as_ref().map(|t| t.as_str()),
      config.start_block,
    );
    processor.check_block(number)
  }).await;

  match result {
    Ok(count) => info!("Block {} has {} creation events.", number, count),
    Err(e) => warn!("Could not check block {}: {}", number, e),
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  let env_path = std::env::var("ENV_FILE").unwrap_or(String::from("./.env"));
  dotenv::from_path(env_path).ok();
  if std::env::var("RUST_LOG").is_err() {
    std::env::set_var("RUST_LOG", "altar_indexer=info,actix_web=info");
  }
  env_logger::init();

  let config = match IndexerConfig::from_env() {
    Ok(config) => config,
    Err(e) => {
      error!("{}", e);
      std::process::exit(1);
    },
  };
  info!("Network {}, start block {}, {} rollup chains.", config.network, config.start_block, config.rollups.len());

  // set up database connection pool
  let manager = ConnectionManager::<PgConnection>::new(config.database_url.clone());
  let pool = match r2d2::Pool::builder().build(manager) {
    Ok(pool) => pool,
    Err(e) => {
      error!("Failed to create db pool: {}", e);
      std::process::exit(1);
    },
  };

  // run migrations
  let migrated = pool.get()
    .map_err(|e| e.to_string())
    .and_then(|conn| embedded_migrations::run(&conn).map_err(|e| e.to_string()));
  if let Err(e) = migrated {
    error!("Failed to run migrations: {}", e);
    std::process::exit(1);
  }

  if let Some(number) = config.check_block {
    check_block(&config, number).await;
  }

  // run worker
  if config.run_worker {
    let _addr = worker::Coordinator::new(config.clone(), pool.clone()).start();
  }

  let bind = config.bind.clone();
  info!("Starting server at: {}", &bind);
  HttpServer::new(move || {
    App::new()
      .data(pool.clone())
      .wrap(Cors::permissive())
      .service(hello)
      .service(get_creations)
      .service(get_creator)
      .service(get_pairs)
      .service(get_pair)
      .service(get_deployments)
      .service(get_salt)
      .service(get_token_deployments)
  })
  .bind(bind)?
  .run()
  .await
}
