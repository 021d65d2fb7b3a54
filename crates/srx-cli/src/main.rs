//! 🚀 srx-cli: the front door of srx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 A thin wrapper: parse args, set up logging, load config, then let the
//! library do the heavy lifting. Like a manager. 🦆
//!
//! ```text
//! srx-cli --config srx.toml index --records records.ndjson --refs refs.txt.gz
//! srx-cli --config srx.toml index-repository --project-id 7 --path ./gitlab.git
//! srx-cli --config srx.toml search "flaky spec" --project-ids 1,2
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, CellAlignment, Table, presets::UTF8_FULL};
use srx::app_config::{AppConfig, load_config};
use srx::indexer::{IndexingPolicy, StaticIndexingPolicy};
use srx::repository::RepositoryKind;
use srx::search::{
    InMemoryAccessPolicy, PageRequest, ProjectScope, Scope, SearchActor, SearchFilters, SearchObject, Sort,
};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "srx-cli", version, about = "🔍 Bulk-index records into a search cluster, and search them back")]
struct Cli {
    /// TOML config file. Without one, only SRX_* environment variables are used.
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream serialized document references into the index.
    Index {
        /// NDJSON file of records, one per line.
        #[arg(long)]
        records: PathBuf,
        /// Serialized references, one per line. May be gzipped.
        #[arg(long)]
        refs: PathBuf,
        /// Projects enabled for indexing when `limit_indexing` is on.
        #[arg(long, value_delimiter = ',')]
        enabled_projects: Vec<u64>,
        /// No progress bar, for logs and CI.
        #[arg(long)]
        no_progress: bool,
    },
    /// Index a project's git repository from where the last run left off.
    IndexRepository {
        #[arg(long)]
        project_id: u64,
        /// The repository on disk, work tree or bare.
        #[arg(long)]
        path: PathBuf,
        /// It's the project's wiki: pages are indexed, history is not.
        #[arg(long)]
        wiki: bool,
        /// Where index statuses are kept between runs. Keep code and wiki apart.
        #[arg(long)]
        status_file: Option<PathBuf>,
    },
    /// Count matches per scope, or list one scope's page.
    Search {
        query: String,
        /// Only these projects. Omit for every project.
        #[arg(long, value_delimiter = ',')]
        project_ids: Vec<u64>,
        /// Search as an administrator in admin mode.
        #[arg(long)]
        admin: bool,
        /// `opened`, `closed`, `merged`, or `all`.
        #[arg(long)]
        state: Option<String>,
        /// `created_desc`, `created_asc`, `updated_desc`, `updated_asc`.
        #[arg(long)]
        sort: Option<String>,
        /// List this scope's results instead of counting every scope.
        #[arg(long)]
        scope: Option<String>,
        #[arg(long, default_value = "1")]
        page: String,
    },
}

/// 🚀 main(): the "I pressed enter and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match load_config(cli.config.as_deref()) {
        Ok(app_config) => execute(app_config, cli.command).await,
        Err(err) => Err(err.context("💀 In srx-cli, we couldn't load the configuration. Check the file and any SRX_* variables.")),
    };

    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut looks_like_connection_trouble = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                looks_like_connection_trouble = true;
            }
        }
        if looks_like_connection_trouble {
            error!(
                "🔧 hint: the search cluster doesn't look reachable. Check `elasticsearch.url`, \
                 and that the cluster is actually running. If you're using Docker, `docker ps` \
                 is a good first stop. ☕"
            );
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn execute(app_config: AppConfig, command: Command) -> Result<()> {
    match command {
        Command::Index {
            records,
            refs,
            enabled_projects,
            no_progress,
        } => {
            let policy: Option<Arc<dyn IndexingPolicy>> = if enabled_projects.is_empty() {
                None
            } else {
                Some(Arc::new(StaticIndexingPolicy::new(enabled_projects)))
            };
            let summary = srx::run(app_config, &records, &refs, policy, !no_progress)
                .await
                .context("💀 The indexing run did not finish.")?;

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["processed", "invalid", "failed"]);
            table.add_row(vec![
                summary.processed.to_string(),
                summary.invalid.len().to_string(),
                summary.failed.len().to_string(),
            ]);
            eprintln!("{table}");
            // failed references go to stdout, one per line, ready to requeue
            for reference in &summary.failed {
                println!("{}", reference.to_serialized());
            }
            Ok(())
        }
        Command::IndexRepository {
            project_id,
            path,
            wiki,
            status_file,
        } => {
            let kind = if wiki { RepositoryKind::Wiki } else { RepositoryKind::Code };
            let status_file = status_file.unwrap_or_else(|| default_status_file(kind));
            let summary = srx::run_repository(app_config, &path, &status_file, project_id, kind)
                .await
                .with_context(|| format!("💀 Indexing the repository at '{}' did not finish.", path.display()))?;

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["plan", "indexed", "deleted", "failed", "recorded"]);
            table.add_row(vec![
                format!("{:?}", summary.plan),
                summary.indexed.to_string(),
                summary.deleted.to_string(),
                summary.failed.len().to_string(),
                summary.recorded.to_string(),
            ]);
            eprintln!("{table}");
            for reference in &summary.failed {
                println!("{}", reference.to_serialized());
            }
            Ok(())
        }
        Command::Search {
            query,
            project_ids,
            admin,
            state,
            sort,
            scope,
            page,
        } => {
            let backend = srx::connect(&app_config.elasticsearch).await?;
            // the CLI has no user database: --admin is user 0 with admin mode on
            let (actor, policy) = if admin {
                (SearchActor::admin(0), InMemoryAccessPolicy::new().with_admin_session(0))
            } else {
                (SearchActor::Anonymous, InMemoryAccessPolicy::new())
            };
            let project_scope = if project_ids.is_empty() {
                ProjectScope::All
            } else {
                ProjectScope::Only(project_ids)
            };
            let filters = SearchFilters {
                state,
                confidential: None,
                sort: sort.as_deref().and_then(Sort::parse),
            };
            let results = srx::search_results(&app_config, backend, &query, &actor, project_scope, &policy, filters);

            match scope {
                None => {
                    results.counts(&Scope::ALL).await.context("💀 Counting results failed.")?;
                    let mut table = Table::new();
                    table.load_preset(UTF8_FULL);
                    table.set_header(vec!["scope", "results"]);
                    for scope in Scope::ALL {
                        let formatted = results.formatted_count(scope.as_str()).await?.unwrap_or_default();
                        table.add_row(vec![
                            Cell::new(scope.as_str()),
                            Cell::new(formatted).set_alignment(CellAlignment::Right),
                        ]);
                    }
                    println!("{table}");
                }
                Some(name) => {
                    let scope = Scope::parse(&name).with_context(|| {
                        format!("💀 '{name}' is not a scope. Try one of: projects, issues, merge_requests, milestones, notes, blobs, wiki_blobs, commits, users.")
                    })?;
                    let page = PageRequest::parse(&page, app_config.search.default_per_page);
                    let collection = results.objects(scope, page).await?;
                    for object in &collection.items {
                        println!("{}", render_object(object)?);
                    }
                    eprintln!(
                        "page {} of {} ({} results)",
                        collection.page,
                        collection.total_pages(),
                        collection.total_count
                    );
                }
            }
            Ok(())
        }
    }
}

fn default_status_file(kind: RepositoryKind) -> PathBuf {
    match kind {
        RepositoryKind::Code => PathBuf::from("srx-index-status.json"),
        RepositoryKind::Wiki => PathBuf::from("srx-wiki-index-status.json"),
    }
}

/// 🖨️ One result as printed: `search_id<TAB>source` for documents, location and snippet for blobs.
fn render_object(object: &SearchObject) -> Result<String> {
    match object {
        SearchObject::Document(document) => {
            let source = serde_json::to_string(&document.source)
                .with_context(|| format!("💀 The source of '{}' refused to become JSON.", document.search_id))?;
            Ok(format!("{}\t{}", document.search_id, source))
        }
        SearchObject::Blob(blob) => Ok(format!("{}:{} @ {}\n{}", blob.path, blob.startline, blob.ref_name, blob.data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use srx::search::{FoundBlob, SearchDocument};

    #[test]
    fn the_one_where_documents_print_as_one_tab_separated_line() -> Result<()> {
        let document = SearchObject::Document(SearchDocument {
            id: Some(1),
            search_id: "issue_1".to_string(),
            score: Some(1.0),
            source: json!({ "title": "flaky spec" }),
        });
        assert_eq!(render_object(&document)?, "issue_1\t{\"title\":\"flaky spec\"}");

        let blob = SearchObject::Blob(FoundBlob {
            path: "lib/bulk.rb".to_string(),
            basename: "lib/bulk".to_string(),
            ref_name: "abc".to_string(),
            startline: 2,
            highlight_line: Some(3),
            data: "b\nbulk here\n".to_string(),
            project_id: Some(1),
        });
        assert_eq!(render_object(&blob)?, "lib/bulk.rb:2 @ abc\nb\nbulk here\n");
        Ok(())
    }

    #[test]
    fn the_one_where_index_repository_parses_its_flags() {
        let cli = Cli::try_parse_from(["srx-cli", "index-repository", "--project-id", "7", "--path", "repo.git", "--wiki"]);
        match cli.map(|cli| cli.command) {
            Ok(Command::IndexRepository { project_id, wiki, status_file, .. }) => {
                assert_eq!(project_id, 7);
                assert!(wiki);
                assert_eq!(status_file.unwrap_or_else(|| default_status_file(RepositoryKind::Wiki)), PathBuf::from("srx-wiki-index-status.json"));
            }
            other => panic!("expected index-repository, got {other:?}"),
        }
    }
}
