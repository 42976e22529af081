use ro_tax_orchestrator::{agent::Orchestrator, config::Settings, models::TurnRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Interactive session on stdin. `/doc <path>` attaches a document to the
/// next message, `/quit` exits.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let orchestrator = Orchestrator::bootstrap(&settings)?;
    let session_id = std::env::args()
        .nth(1)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    info!(session_id = %session_id, "Interactive session started");

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending_document: Option<String> = None;

    stdout
        .write_all(format!("Session {}. Type /quit to exit.\n> ", session_id).as_bytes())
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();

        if line == "/quit" {
            break;
        }

        if let Some(path) = line.strip_prefix("/doc ") {
            pending_document = Some(path.trim().to_string());
            stdout.write_all(b"Document attached to your next message.\n> ").await?;
            stdout.flush().await?;
            continue;
        }

        if line.is_empty() {
            stdout.write_all(b"> ").await?;
            stdout.flush().await?;
            continue;
        }

        let mut request = TurnRequest::new(session_id.as_str(), line);
        request.document = pending_document.take();

        let output = match orchestrator.run_turn(request).await {
            Ok(response) => format!(
                "\n{}\n\n[{} | {}]\n> ",
                response.response_text,
                response.handler.map(|h| h.as_str()).unwrap_or("none"),
                response.workflow_status
            ),
            Err(e) => {
                warn!(error = %e, "Turn rejected");
                format!("{}\n> ", e)
            }
        };

        stdout.write_all(output.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}
