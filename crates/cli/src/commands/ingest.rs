use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use leadwise_agent::ingest::{HttpPageFetcher, IngestReport, Ingestor};
use leadwise_agent::llm::{LlmClient, OpenAiCompatibleClient};
use leadwise_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use leadwise_db::repositories::Repositories;
use leadwise_db::{connect_from_config, migrations};
use serde::Serialize;

use crate::commands::{to_json_line, CommandResult};

#[derive(Debug, Serialize)]
struct IngestOutcome<'a> {
    command: &'static str,
    status: &'static str,
    #[serde(flatten)]
    report: &'a IngestReport,
}

/// `sites` replaces `knowledge.sites` when non-empty, and is validated the same way.
pub fn run(sites: Vec<String>) -> CommandResult {
    let overrides = ConfigOverrides {
        knowledge_sites: (!sites.is_empty()).then_some(sites),
        ..ConfigOverrides::default()
    };
    let config = match AppConfig::load(LoadOptions { overrides, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "ingest",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    if config.knowledge.sites.is_empty() {
        return CommandResult::failure(
            "ingest",
            "config_validation",
            "no sites to crawl: set knowledge.sites or pass --site",
            2,
        );
    }

    let embedder: Arc<dyn LlmClient> = match OpenAiCompatibleClient::from_config(&config.llm) {
        Ok(Some(client)) => Arc::new(client),
        Ok(None) => {
            return CommandResult::failure(
                "ingest",
                "config_validation",
                "ingestion needs an embedding provider: set llm.provider to openai or ollama",
                2,
            );
        }
        Err(error) => {
            return CommandResult::failure(
                "ingest",
                "config_validation",
                format!("llm client could not be built: {error:#}"),
                2,
            );
        }
    };
    let fetcher =
        match HttpPageFetcher::new(Duration::from_secs(config.knowledge.request_timeout_secs)) {
            Ok(fetcher) => Arc::new(fetcher),
            Err(error) => {
                return CommandResult::failure(
                    "ingest",
                    "config_validation",
                    format!("http client could not be built: {error:#}"),
                    2,
                );
            }
        };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "ingest",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store = Repositories::sql(pool.clone()).knowledge;
        let ingestor = Ingestor::new(store, embedder, fetcher, config.knowledge.clone());
        let report = ingestor
            .run(&config.knowledge.sites, Utc::now())
            .await
            .map_err(|error| ("ingestion", format!("{error:#}"), 7u8));
        pool.close().await;
        report
    });

    match result {
        Ok(report) => {
            tracing::info!(
                event_name = "ingest.run.done",
                pages = report.pages,
                chunks_upserted = report.chunks_upserted,
                "ingestion finished"
            );
            let outcome = IngestOutcome { command: "ingest", status: "ok", report: &report };
            CommandResult { exit_code: 0, output: to_json_line("ingest", &outcome) }
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("ingest", error_class, message, exit_code)
        }
    }
}
