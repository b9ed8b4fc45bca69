use clap::{Parser, Subcommand};
use futures_util::FutureExt;
use stagehand_core::{
    ConsumeOptions, EventStream, RequestOptions, StagehandClient, StreamEvent,
    config::{Config, LOCAL_BASE_URL},
    consumer, log_result,
    model::{
        SessionActParams, SessionEndParams, SessionExecuteParams, SessionExtractParams,
        SessionNavigateParams, SessionObserveParams, SessionStartParams,
    },
    session::SessionService,
    stream::StreamEventData,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Stagehand CLI smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). Defaults come from the environment otherwise.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
    /// Talk to a server on localhost:3000
    #[arg(long, global = true)]
    local: bool,
    /// Use the streaming variant and print events live
    #[arg(long, global = true)]
    stream: bool,
    /// When streaming, recover a result from log events if the final event has none
    #[arg(long, global = true, requires = "stream")]
    log_fallback: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a browser session
    Start {
        #[arg(long, default_value = "openai/gpt-4o")]
        model: String,
    },
    /// Navigate the session to a URL
    Navigate {
        #[arg(long)]
        session: String,
        #[arg(long)]
        url: String,
    },
    /// List actionable elements
    Observe {
        #[arg(long)]
        session: String,
        #[arg(short, long)]
        instruction: Option<String>,
    },
    /// Perform one action
    Act {
        #[arg(long)]
        session: String,
        #[arg(short, long)]
        instruction: String,
    },
    /// Extract data, optionally shaped by a JSON Schema
    Extract {
        #[arg(long)]
        session: String,
        #[arg(short, long)]
        instruction: String,
        #[arg(long, help = "JSON Schema as a string")]
        schema: Option<String>,
    },
    /// Run an agent task
    Execute {
        #[arg(long)]
        session: String,
        #[arg(short, long)]
        instruction: String,
        #[arg(long)]
        max_steps: Option<f64>,
        #[arg(long, help = "Agent model, e.g. anthropic/claude-sonnet-4-5")]
        agent_model: Option<String>,
    },
    /// End the session
    End {
        #[arg(long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::from_env(),
    };
    if cli.local {
        cfg.api.base_url = LOCAL_BASE_URL.to_string();
    }
    let client = StagehandClient::from_config(&cfg)?;
    let sessions = client.sessions();

    if cli.stream {
        let stream = open_stream(sessions, &cli.command).await?;
        run_stream(stream, cli.log_fallback).await
    } else {
        let resp = call(sessions, &cli.command).await?;
        println!("{}", serde_json::to_string_pretty(&resp)?);
        Ok(())
    }
}

async fn call(sessions: &SessionService, cmd: &Commands) -> anyhow::Result<serde_json::Value> {
    let opts = RequestOptions::default();
    let value = match cmd {
        Commands::Start { model } => {
            serde_json::to_value(sessions.start(&SessionStartParams::new(model), &opts).await?)?
        }
        Commands::Navigate { session, url } => serde_json::to_value(
            sessions
                .navigate(session, &SessionNavigateParams::new(url), &opts)
                .await?,
        )?,
        Commands::Observe {
            session,
            instruction,
        } => serde_json::to_value(
            sessions
                .observe(session, &observe_params(instruction), &opts)
                .await?,
        )?,
        Commands::Act {
            session,
            instruction,
        } => serde_json::to_value(
            sessions
                .act(session, &SessionActParams::new(instruction.as_str()), &opts)
                .await?,
        )?,
        Commands::Extract {
            session,
            instruction,
            schema,
        } => {
            let params = extract_params(instruction, schema.as_deref())?;
            serde_json::to_value(sessions.extract(session, &params, &opts).await?)?
        }
        Commands::Execute {
            session,
            instruction,
            max_steps,
            agent_model,
        } => {
            let params = execute_params(instruction, *max_steps, agent_model.as_deref());
            serde_json::to_value(sessions.execute(session, &params, &opts).await?)?
        }
        Commands::End { session } => serde_json::to_value(
            sessions
                .end(session, &SessionEndParams::default(), &opts)
                .await?,
        )?,
    };
    Ok(value)
}

async fn open_stream(sessions: &SessionService, cmd: &Commands) -> anyhow::Result<EventStream> {
    let opts = RequestOptions::default();
    let stream = match cmd {
        Commands::Start { model } => {
            sessions
                .start_streaming(&SessionStartParams::new(model), &opts)
                .await?
        }
        Commands::Navigate { session, url } => {
            sessions
                .navigate_streaming(session, &SessionNavigateParams::new(url), &opts)
                .await?
        }
        Commands::Observe {
            session,
            instruction,
        } => {
            sessions
                .observe_streaming(session, &observe_params(instruction), &opts)
                .await?
        }
        Commands::Act {
            session,
            instruction,
        } => {
            sessions
                .act_streaming(session, &SessionActParams::new(instruction.as_str()), &opts)
                .await?
        }
        Commands::Extract {
            session,
            instruction,
            schema,
        } => {
            let params = extract_params(instruction, schema.as_deref())?;
            sessions.extract_streaming(session, &params, &opts).await?
        }
        Commands::Execute {
            session,
            instruction,
            max_steps,
            agent_model,
        } => {
            let params = execute_params(instruction, *max_steps, agent_model.as_deref());
            sessions.execute_streaming(session, &params, &opts).await?
        }
        Commands::End { session } => {
            sessions
                .end_streaming(session, &SessionEndParams::default(), &opts)
                .await?
        }
    };
    Ok(stream)
}

fn observe_params(instruction: &Option<String>) -> SessionObserveParams {
    SessionObserveParams {
        instruction: instruction.clone(),
        ..Default::default()
    }
}

fn extract_params(instruction: &str, schema: Option<&str>) -> anyhow::Result<SessionExtractParams> {
    let mut params = SessionExtractParams::new(instruction);
    if let Some(raw) = schema {
        let schema: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| anyhow::anyhow!("--schema is not valid JSON: {e}"))?;
        if !schema.is_object() {
            anyhow::bail!("--schema must be a JSON object");
        }
        params = params.with_schema(schema);
    }
    Ok(params)
}

fn execute_params(
    instruction: &str,
    max_steps: Option<f64>,
    agent_model: Option<&str>,
) -> SessionExecuteParams {
    let mut params = SessionExecuteParams::new(instruction);
    params.execute_options.max_steps = max_steps;
    params.agent_config.model = agent_model.map(Into::into);
    params
}

async fn run_stream(mut stream: EventStream, log_fallback: bool) -> anyhow::Result<()> {
    let label = stream.operation().map(|o| o.name()).unwrap_or("stream");
    let opts = stream
        .operation()
        .map(ConsumeOptions::for_operation)
        .unwrap_or_default();
    let mut print = |ev: &StreamEvent| match &ev.data {
        StreamEventData::Log(log) => match log.message.text() {
            Some(text) => println!("[{label}][log] {text}"),
            None => println!("[{label}][log] {:?}", log.message),
        },
        StreamEventData::System(sys) => println!("[{label}][system] {}", sys.status.as_str()),
    };

    let interrupted = tokio::signal::ctrl_c().map(|_| ());
    let result = if log_fallback {
        log_result::consume_with_fallback_until(&mut stream, opts, &mut print, interrupted).await
    } else {
        consumer::consume_until(&mut stream, opts, &mut print, interrupted).await
    }?;

    match result {
        Some(v) => println!("{}", serde_json::to_string_pretty(&v)?),
        None => println!("[{label}] finished without result"),
    }
    Ok(())
}
