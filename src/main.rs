use clap::Parser;
use nestegg::api::{Cli, Command, run_http_server, run_project_command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = nestegg::logging::init_logging(&cli.log_level) {
        eprintln!("{e}");
    }

    match cli.command {
        Command::Serve { port } => {
            if let Err(e) = run_http_server(port).await {
                tracing::error!("server error: {e}");
                std::process::exit(1);
            }
        }
        Command::Project(args) => match run_project_command(args) {
            Ok(output) => println!("{output}"),
            Err(e) => {
                tracing::error!("{e}");
                eprintln!("Error: {e}");
                std::process::exit(2);
            }
        },
    }
}
