use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use gor_table::bucket::PackLevel;
use gor_table::config::ManagerConfig;
use gor_table::manager::{
    absolute, BucketizeArgs, InsertArgs, MultiInsertArgs, SelectionArgs, TableManager,
};

/// 基因组文件字典表管理
#[derive(Parser, Debug)]
#[command(name = "gortable", version, about = "Manage gor dictionary tables")]
struct Cli {
    /// 配置文件（TOML）；缺省为 <config dir>/gortable/config.toml
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// 输出 debug 日志
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Insert files into the table; all options apply to all files
    Insert {
        #[arg(short, long)]
        alias: Option<String>,
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(short, long)]
        range: Option<String>,
        /// Column used for tag filtering
        #[arg(short, long)]
        source: Option<String>,
        /// The tag set is a unique key: replace the entry with the same tags
        #[arg(long)]
        tagskey: bool,
        #[arg(long)]
        nohistory: bool,
        table: PathBuf,
        files: Vec<String>,
    },
    /// Insert files with per-file aliases / tags / ranges
    #[command(alias = "m")]
    Multiinsert {
        #[arg(short, long, value_delimiter = ',')]
        aliases: Vec<String>,
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(short, long, value_delimiter = ',')]
        ranges: Vec<String>,
        #[arg(short, long)]
        source: Option<String>,
        #[arg(long)]
        nohistory: bool,
        table: PathBuf,
        files: Vec<String>,
    },
    /// Delete matching entries
    Delete {
        #[command(flatten)]
        selection: Selection,
        table: PathBuf,
        /// Files to delete (alternative to -f)
        files: Vec<String>,
    },
    /// Print matching entries
    Select {
        #[command(flatten)]
        selection: Selection,
        table: PathBuf,
        files: Vec<String>,
    },
    /// Merge unbucketized entries into bucket files
    Bucketize {
        #[arg(short, long)]
        workers: Option<usize>,
        #[arg(long = "min_bucket_size")]
        min_bucket_size: Option<usize>,
        #[arg(long = "bucket_size")]
        bucket_size: Option<usize>,
        /// NO_PACKING, CONSOLIDATE or FULL_PACKING
        #[arg(short = 'c', long = "pack_level")]
        pack_level: Option<PackLevel>,
        #[arg(short = 'd', long = "bucket_dirs", value_delimiter = ',')]
        bucket_dirs: Vec<String>,
        #[arg(long = "max_bucket_count", allow_negative_numbers = true)]
        max_bucket_count: Option<i64>,
        /// Delete unused bucket files regardless of the grace period
        #[arg(long = "force_clean")]
        force_clean: bool,
        table: PathBuf,
    },
    /// Delete buckets; their entries need bucketizing again
    #[command(name = "delete_bucket")]
    DeleteBucket {
        #[arg(long)]
        force: bool,
        table: PathBuf,
        buckets: Vec<String>,
    },
    /// Create a link table or point it at another dictionary
    Link { link: PathBuf, uri: String },
    /// Show entry, bucket and history summary
    Info { table: PathBuf },
}

#[derive(Args, Debug)]
struct Selection {
    #[arg(short = 'f', long, value_delimiter = ',')]
    files: Vec<String>,
    #[arg(short, long, value_delimiter = ',')]
    aliases: Vec<String>,
    #[arg(short, long, value_delimiter = ',')]
    tags: Vec<String>,
    #[arg(short, long, value_delimiter = ',')]
    buckets: Vec<String>,
    #[arg(short, long)]
    range: Option<String>,
    #[arg(long = "include_deleted")]
    include_deleted: bool,
}

impl Selection {
    fn into_args(self, extra_files: Vec<String>) -> SelectionArgs {
        let mut files = self.files;
        files.extend(extra_files);
        SelectionArgs {
            files,
            aliases: self.aliases,
            tags: self.tags,
            buckets: self.buckets,
            range: self.range,
            include_deleted: self.include_deleted,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "gor_table=debug,gortable=debug"
        } else {
            "gor_table=warn"
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = ManagerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let tm = TableManager::new(config);

    match cli.command {
        Command::Insert {
            alias,
            tags,
            range,
            source,
            tagskey,
            nohistory,
            table,
            files,
        } => {
            let args = InsertArgs {
                alias,
                tags,
                range,
                source,
                tagskey,
                nohistory,
            };
            let table = absolute(&table);
            let n = tm
                .insert(&table, &files, &args)
                .with_context(|| format!("insert into {}", table.display()))?;
            tracing::info!("{} file(s) inserted", n);
        }
        Command::Multiinsert {
            aliases,
            tags,
            ranges,
            source,
            nohistory,
            table,
            files,
        } => {
            let args = MultiInsertArgs {
                aliases,
                tags,
                ranges,
                source,
                nohistory,
            };
            let table = absolute(&table);
            tm.multi_insert(&table, &files, &args)
                .with_context(|| format!("multiinsert into {}", table.display()))?;
        }
        Command::Delete {
            selection,
            table,
            files,
        } => {
            let table = absolute(&table);
            let n = tm
                .delete(&table, &selection.into_args(files))
                .with_context(|| format!("delete from {}", table.display()))?;
            tracing::info!("{} entr(ies) deleted", n);
        }
        Command::Select {
            selection,
            table,
            files,
        } => {
            let table = absolute(&table);
            let lines = tm
                .select(&table, &selection.into_args(files))
                .with_context(|| format!("select from {}", table.display()))?;
            for line in lines {
                println!("{}", line);
            }
        }
        Command::Bucketize {
            workers,
            min_bucket_size,
            bucket_size,
            pack_level,
            bucket_dirs,
            max_bucket_count,
            force_clean,
            table,
        } => {
            let args = BucketizeArgs {
                workers,
                min_bucket_size,
                bucket_size,
                pack_level,
                bucket_dirs,
                max_bucket_count,
                force_clean,
            };
            let table = absolute(&table);
            let report = tm
                .bucketize(&table, &args)
                .with_context(|| format!("bucketize {}", table.display()))?;
            for b in &report.created {
                println!("created\t{}", b);
            }
            for b in report.deleted.iter().chain(&report.cleaned) {
                println!("removed\t{}", b);
            }
        }
        Command::DeleteBucket {
            force,
            table,
            buckets,
        } => {
            let table = absolute(&table);
            tm.delete_buckets(&table, &buckets, force)
                .with_context(|| format!("delete buckets from {}", table.display()))?;
        }
        Command::Link { link, uri } => {
            let link = absolute(&link);
            tm.link(&link, &uri)
                .with_context(|| format!("link {}", link.display()))?;
        }
        Command::Info { table } => {
            let table = absolute(&table);
            let stats = tm
                .info(&table)
                .with_context(|| format!("info {}", table.display()))?;
            println!("{}", stats);
        }
    }
    Ok(())
}
