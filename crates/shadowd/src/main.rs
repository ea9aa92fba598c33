//! # shadowd
//!
//! Accepts instrumented processes over TCP and runs one analysis session per
//! connection. Each session gets its own shadow heap and its own analyses.

mod args;
mod counting;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use shadowrun::AnalysisDispatcher;
use shadowrun::ServerConfig;
use shadowrun::SessionSummary;
use shadowrun::TcpTransport;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::Instrument;
use tracing::error;
use tracing::info;
use tracing::info_span;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::args::Args;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log.as_deref())?;

    let config = args.server_config();
    config.validate().context("invalid server settings")?;

    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("cannot listen on {}", config.listen))?;
    info!(addr = %listener.local_addr()?, analysis = %args.analysis, "shadowd listening");

    let served = tokio::select! {
        res = serve(listener, &config, &args.analysis, args.sessions) => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            Vec::new()
        }
    };
    info!(sessions = served.len(), "shadowd stopped");
    Ok(())
}

fn init_tracing(filter: Option<&str>) -> Result<()> {
    let filter = match filter {
        Some(f) => EnvFilter::try_new(f).with_context(|| format!("bad log filter {:?}", f))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Accepts connections until `limit` sessions have finished (0 = forever).
///
/// Returns the summaries of sessions that ended normally.
async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    prefix: &str,
    limit: u64,
) -> Result<Vec<SessionSummary>> {
    let mut sessions = JoinSet::new();
    let mut accepted = 0u64;
    let mut served = Vec::new();

    loop {
        if limit != 0 && accepted == limit {
            break;
        }
        tokio::select! {
            conn = listener.accept() => {
                let (stream, peer) = match conn {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let transport = match TcpTransport::from_stream(stream) {
                    Ok(t) => t.with_read_chunk(config.read_chunk),
                    Err(e) => {
                        warn!(%peer, error = %e, "dropping connection");
                        continue;
                    }
                };
                let registry = counting::registry(prefix)?;
                let dispatcher = AnalysisDispatcher::new(Box::new(transport), registry, config);
                accepted += 1;
                sessions.spawn(dispatcher.run().instrument(info_span!("session", %peer)));
            }
            Some(done) = sessions.join_next(), if !sessions.is_empty() => {
                record(done, &mut served);
            }
        }
    }

    while let Some(done) = sessions.join_next().await {
        record(done, &mut served);
    }
    Ok(served)
}

fn record(
    done: std::result::Result<shadowrun::dispatcher::Result<SessionSummary>, tokio::task::JoinError>,
    served: &mut Vec<SessionSummary>,
) {
    match done {
        Ok(Ok(summary)) => served.push(summary),
        // The dispatcher already logged it.
        Ok(Err(_)) => {}
        Err(e) => error!(error = %e, "session task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use shadowrun::ClientConfig;
    use shadowrun::DispatchClient;
    use shadowrun::NetReference;
    use shadowrun::TypedValue;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serves_one_session() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            serve(listener, &ServerConfig::default(), "analysis.Remote", 1).await
        });

        let transport = TcpTransport::connect(addr).await?;
        let client = Arc::new(DispatchClient::start(Box::new(transport), ClientConfig::default())?);
        let c = client.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let add = c.register_method("analysis.Remote.add")?;
            let remove = c.register_method("analysis.Remote.remove")?;
            let obj = NetReference::new(1, 1, false);
            c.dispatch(add, &[TypedValue::Object(obj)])?;
            c.dispatch(add, &[TypedValue::Object(obj)])?;
            c.dispatch(remove, &[TypedValue::Object(obj)])?;
            c.object_freed(obj)?;
            Ok(())
        })
        .await??;
        client.shutdown().await?;

        let served = server.await??;
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].events, 3);
        assert_eq!(served[0].frees, 1);
        assert_eq!(served[0].registrations, 2);
        assert!(served[0].closed_cleanly);
        Ok(())
    }
}
