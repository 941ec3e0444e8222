use clap::{Parser, Subcommand};
use grpc_edge_gateway::components::build_identity;
use grpc_edge_gateway::config::OriginEndpoint;
use grpc_edge_gateway::logging::init_logging;
use grpc_edge_gateway::rpc::client::ChatClient;
use grpc_edge_gateway::GatewayError;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "chat-client")]
#[command(about = "Calls the chat, health and reflection services through the gateway")]
#[command(version)]
struct ClientArgs {
    /// Server address (host:port)
    #[arg(long, default_value = "localhost:50050")]
    address: String,

    /// Name the server certificate must carry
    #[arg(long, default_value = "localhost")]
    server_name: String,

    /// Trust bundle for the server certificate
    #[arg(long)]
    ca: Option<PathBuf>,

    /// Client certificate presented to the server
    #[arg(long)]
    cert: Option<PathBuf>,

    #[arg(long)]
    key: Option<PathBuf>,

    /// Skip server certificate verification
    #[arg(long)]
    insecure: bool,

    /// Per-call deadline in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// chat.Greeter/SayHello
    Hello { name: String },
    /// chat.Greeter/LotsOfReplies
    Lots { name: String },
    /// chat.Greeter/ManyHellos with one message per name
    Many { names: Vec<String> },
    /// chat.Echo/Replay
    Echo { message: String },
    /// chat.Health/Status
    Status,
    /// Reflection list_services
    Services,
}

#[tokio::main]
async fn main() {
    let args = ClientArgs::parse();

    if let Err(e) = init_logging("grpc_edge_gateway", &args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let client = match connect(&args).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to connect to {}: {}", args.address, e);
            process::exit(1);
        }
    };

    let outcome = match args.command {
        Command::Hello { name } => client.say_hello(&name).await.map(|reply| vec![reply]),
        Command::Lots { name } => client.lots_of_replies(&name).await,
        Command::Many { names } => client.many_hellos(names).await,
        Command::Echo { message } => client.replay(&message).await.map(|reply| vec![reply]),
        Command::Status => client
            .status()
            .await
            .map(|reply| vec![format!("{} {}", reply.code, reply.message)]),
        Command::Services => client.list_services().await,
    };

    match outcome {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(status) => {
            eprintln!("Call failed: {}", status);
            process::exit(1);
        }
    }
}

async fn connect(args: &ClientArgs) -> Result<ChatClient, GatewayError> {
    let timeout = Duration::from_secs(args.timeout);
    let endpoint = OriginEndpoint {
        address: args.address.clone(),
        server_name: args.server_name.clone(),
        ca_file: args.ca.clone(),
        cert_file: args.cert.clone(),
        key_file: args.key.clone(),
        timeout,
    };
    endpoint.validate(args.insecure)?;

    let (role, material) = endpoint.client_identity(args.insecure)?;
    let identity = build_identity(role, &material)?.into_client()?;
    Ok(ChatClient::connect(&endpoint.address, &identity, timeout)
        .await?
        .with_timeout(timeout))
}
