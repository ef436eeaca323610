//! COMO scene server.
//!
//! Hosts one shared scene and relays every accepted command to all
//! connected users.
//!
//! ```text
//! como-server 7777 8 --scene-name "Living room"
//! ```

use clap::Parser;
use log::info;

use como_collab::historic::DEFAULT_HISTORIC_RETENTION;
use como_collab::scene::DEFAULT_MAX_LIGHTS;
use como_collab::server::{ServerConfig, SyncServer};

#[derive(Parser, Debug)]
#[command(name = "como-server", about = "Collaborative scene server", version)]
struct Args {
    /// TCP port to listen on
    port: u16,

    /// Maximum number of simultaneous users
    #[arg(default_value_t = 8)]
    max_users: usize,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Scene name announced to joining users
    #[arg(long, default_value = "Untitled scene")]
    scene_name: String,

    #[arg(long, default_value_t = DEFAULT_MAX_LIGHTS)]
    max_lights: usize,

    /// Commands every user has received that are kept before pruning
    #[arg(long, default_value_t = DEFAULT_HISTORIC_RETENTION)]
    historic_retention: usize,
}

impl Args {
    fn to_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            max_users: self.max_users,
            scene_name: self.scene_name.clone(),
            max_lights: self.max_lights,
            historic_retention: self.historic_retention,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.max_users == 0 {
        return Err("max_users must be at least 1".into());
    }
    let config = args.to_config();
    info!(
        "Starting COMO server for {:?} on {} (up to {} users)",
        config.scene_name, config.bind_addr, config.max_users
    );

    SyncServer::new(config).run().await
}
