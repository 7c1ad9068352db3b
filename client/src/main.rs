use std::env;
use std::io::Write;
use std::time::Duration;

use log::error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

use parlor_client::commands::help_text;
use parlor_client::{Client, ClientConfig, ClientError, Credentials, UserCommand};

const USAGE: &str = "usage: parlor <server_host> <server_port>";

enum Next {
    Continue,
    Quit,
}

async fn prompt<R: AsyncBufRead + Unpin>(lines: &mut Lines<R>, label: &str) -> Option<String> {
    print!("{}", label);
    let _ = std::io::stdout().flush();
    match lines.next_line().await {
        Ok(Some(line)) => Some(line.trim().to_string()).filter(|s| !s.is_empty()),
        _ => None,
    }
}

async fn ask_credentials<R: AsyncBufRead + Unpin>(
    given: Option<Credentials>,
    lines: &mut Lines<R>,
) -> Result<Credentials, ClientError> {
    if let Some(creds) = given {
        return Ok(creds);
    }
    let username = prompt(lines, "username: ").await;
    let password = prompt(lines, "password: ").await;
    match (username, password) {
        (Some(username), Some(password))
            if !username.contains(char::is_whitespace) && !password.contains(char::is_whitespace) =>
        {
            Ok(Credentials { username, password })
        }
        _ => Err(ClientError::Usage("username and password are single words")),
    }
}

async fn run_command<R: AsyncBufRead + Unpin>(
    client: &Client,
    command: UserCommand,
    lines: &mut Lines<R>,
) -> Result<Next, ClientError> {
    match command {
        UserCommand::Register(given) => {
            let creds = ask_credentials(given, lines).await?;
            client.register(&creds.username, &creds.password).await?;
        }
        UserCommand::Login(given) => {
            let creds = ask_credentials(given, lines).await?;
            client.login(&creds.username, &creds.password).await?;
        }
        UserCommand::Message { to, text } => client.message(&to, &text).await?,
        UserCommand::Invite { to, message } => client.invite(&to, &message).await?,
        UserCommand::Accept { from, message } => client.accept(&from, &message).await?,
        UserCommand::Logout => client.logout().await?,
        UserCommand::Help => println!("{}", help_text(client.is_authenticated().await)),
        UserCommand::Exit => {
            client.exit().await?;
            return Ok(Next::Quit);
        }
    }
    Ok(Next::Continue)
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let (host, port) = match args.as_slice() {
        [host, port] => match port.parse::<u16>() {
            Ok(port) => (host.clone(), port),
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

    let config = ClientConfig::from_env(host, port);
    let (client, mut notices) = match Client::connect(config).await {
        Ok(pair) => pair,
        Err(e) => {
            error!("Could not reach the directory: {}", e);
            eprintln!("Could not reach the directory: {}", e);
            std::process::exit(1);
        }
    };

    let printer = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("{}", notice);
        }
    });

    println!("{}", help_text(false));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut closed = client.closed();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        client.terminate().await;
                        break;
                    }
                    Err(e) => {
                        error!("Reading stdin failed: {}", e);
                        client.terminate().await;
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                let outcome = match UserCommand::parse(&line) {
                    Ok(command) => run_command(&client, command, &mut lines).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(Next::Continue) => {}
                    Ok(Next::Quit) => break,
                    Err(e) => println!("{}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                client.terminate().await;
                break;
            }
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break;
                }
            }
        }
    }

    drop(client);
    let _ = tokio::time::timeout(Duration::from_millis(500), printer).await;
}
