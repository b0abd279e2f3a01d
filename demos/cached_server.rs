//! A small server whose routes share one cache store.
//!
//! ```text
//! cargo run --example cached_server -- --create-config cache.yaml
//! cargo run --example cached_server -- cache.yaml
//! curl -i http://127.0.0.1:8080/time
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use respcache::cache::{CacheFactory, tracing_reporter};
use respcache::config::{CacheSettings, read_config, write_config};
use respcache::context::Context;
use respcache::middleware::{LoggerMiddleware, adapt, from_middleware, max_body_5mib};
use respcache::{Response, Server, StatusCode};
use tracing_subscriber::EnvFilter;

async fn route(ctx: Context, ttl: Duration) -> Response {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    match ctx.request().path() {
        "/time" => Response::new(StatusCode::Ok)
            .header("Content-Type", "application/json")
            .body(format!(r#"{{"generated_at":{now},"ttl_secs":{}}}"#, ttl.as_secs())),
        "/echo" => match ctx.request().body().read() {
            Ok(body) => Response::new(StatusCode::Ok).body_bytes(body.to_vec()),
            Err(e) => Response::new(StatusCode::PayloadTooLarge).body(e.to_string()),
        },
        _ => Response::new(StatusCode::NotFound).body("Not Found"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,respcache=debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let settings: CacheSettings = match args.as_slice() {
        [flag, path] if flag == "--create-config" => {
            write_config(path, &CacheSettings::default())?;
            println!("Wrote default config to {path}");
            return Ok(());
        }
        [path] => read_config(path)?,
        _ => CacheSettings::default(),
    };
    let ttl = settings.ttl();

    let factory = CacheFactory::new(&settings, Some(tracing_reporter()))?;
    let handler = adapt(
        move |ctx: Context| route(ctx, ttl),
        [
            from_middleware(Arc::new(LoggerMiddleware)),
            max_body_5mib(),
            factory.layer(ttl),
        ],
    );

    let server = Server::bind("127.0.0.1:8080").await?;
    println!("Listening on http://{}", server.local_addr());
    server.serve(handler).await?;
    Ok(())
}
