// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use coin_shop_rs::api::{AppState, router};
use coin_shop_rs::catalog::{default_catalog, load_catalog};
use coin_shop_rs::{Engine, EngineConfig, RetryPolicy, Role, ShopError};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Coin Shop - In-game coin shop purchase server
///
/// Serves the catalog, purchases, login-code redemption and the admin and
/// delivery-agent endpoints over HTTP/JSON.
#[derive(Parser, Debug)]
#[command(name = "coin-shop-rs")]
#[command(about = "An in-game coin shop purchase server", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SHOP_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// CSV file to seed an empty catalog from
    ///
    /// Expected format: name,name_en,description,category,price,image,stock,is_new,is_featured
    /// Without it the launch catalog is seeded.
    #[arg(long, env = "SHOP_CATALOG", value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Username of an admin account to create at startup
    #[arg(long, env = "SHOP_ADMIN")]
    admin: Option<String>,

    /// Coins granted to the bootstrap admin
    #[arg(long, env = "SHOP_ADMIN_COINS", default_value_t = 0)]
    admin_coins: i64,

    /// Shared secret the delivery agent sends in `x-agent-secret`
    #[arg(long, env = "SHOP_AGENT_SECRET")]
    agent_secret: Option<String>,

    /// Shared secret the chat bot sends in `x-admin-secret`; bot routes stay closed without it
    #[arg(long, env = "SHOP_ADMIN_SECRET")]
    admin_secret: Option<String>,

    /// Row lock wait before reporting contention, in milliseconds
    #[arg(long, env = "SHOP_LOCK_TIMEOUT_MS", default_value_t = 500)]
    lock_timeout_ms: u64,

    /// Attempts per operation under contention, including the first
    #[arg(long, env = "SHOP_MAX_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// Login code validity, in seconds
    #[arg(long, env = "SHOP_LOGIN_CODE_TTL_SECS", default_value_t = 600)]
    login_code_ttl_secs: u64,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                ..RetryPolicy::default()
            },
            login_code_ttl: Duration::from_secs(self.login_code_ttl_secs),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let engine = Engine::in_memory(args.engine_config());

    if let Err(e) = seed(&engine, args.catalog.as_ref()) {
        error!(error = %e, "failed to seed catalog");
        process::exit(1);
    }

    if let Some(username) = &args.admin {
        if let Err(e) = bootstrap_admin(&engine, username, args.admin_coins) {
            error!(error = %e, username, "failed to create admin account");
            process::exit(1);
        }
    }

    let app = router(AppState {
        engine: Arc::new(engine),
        agent_secret: args.agent_secret.clone(),
        admin_secret: args.admin_secret.clone(),
    });

    let listener = match TcpListener::bind(args.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, bind = %args.bind, "failed to bind");
            process::exit(1);
        }
    };
    info!(bind = %args.bind, "coin shop listening");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
        process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum SeedError {
    #[error("cannot open catalog: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot read catalog: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Shop(#[from] ShopError),
}

fn seed(engine: &Engine, catalog: Option<&PathBuf>) -> Result<(), SeedError> {
    let products = match catalog {
        Some(path) => load_catalog(BufReader::new(File::open(path)?))?,
        None => default_catalog(),
    };
    let added = engine.seed_catalog(products)?;
    info!(added, "catalog ready");
    Ok(())
}

/// Creates the admin account unless it already exists.
fn bootstrap_admin(engine: &Engine, username: &str, coins: i64) -> Result<(), ShopError> {
    let admin = match engine.create_account(username, Role::Admin) {
        Ok(admin) => admin,
        Err(ShopError::UsernameTaken) => return Ok(()),
        Err(e) => return Err(e),
    };
    if coins != 0 {
        engine.adjust_balance(admin.id(), coins)?;
    }
    info!(account = %admin.id(), username, "admin account ready");
    Ok(())
}
