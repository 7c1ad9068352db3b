use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use log::{error, info};

use parlor_directory::config::ServerConfig;
use parlor_directory::handlers::http::serve_status;
use parlor_directory::Server;

const USAGE: &str = "usage: parlor-directory <user_file> <port>\n       parlor-directory --healthcheck <port>";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    // Healthcheck mode: exit 0 if the directory is running (port in use), exit 1 if not
    if args.first().map(String::as_str) == Some("--healthcheck") {
        let port = args.get(1).and_then(|p| p.parse::<u16>().ok()).unwrap_or_else(|| {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        });
        match std::net::TcpListener::bind(("127.0.0.1", port)) {
            Ok(_) => std::process::exit(1),
            Err(_) => std::process::exit(0),
        }
    }

    env_logger::init();

    let (user_file, port) = match args.as_slice() {
        [file, port] => match port.parse::<u16>() {
            Ok(port) => (PathBuf::from(file), port),
            Err(_) => {
                eprintln!("invalid port {:?}\n{}", port, USAGE);
                std::process::exit(2);
            }
        },
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    let config = ServerConfig::from_env(user_file, port);
    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start directory: {}", e);
            std::process::exit(1);
        }
    };

    match server.local_addr() {
        Ok(addr) => info!("Directory listening on {}", addr),
        Err(e) => error!("Failed to read listener address: {}", e),
    }

    if let Some(status_port) = config.status_port {
        let addr = SocketAddr::new(config.bind_addr, status_port);
        let state = server.state();
        tokio::spawn(async move {
            if let Err(e) = serve_status(addr, state).await {
                error!("Status endpoint error: {}", e);
            }
        });
    }

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Interrupt received; shutting down");
    };

    if let Err(e) = server.run(shutdown).await {
        error!("Directory error: {}", e);
        std::process::exit(1);
    }
}
