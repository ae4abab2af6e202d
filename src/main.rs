mod cli;

use std::{io::Write, sync::Arc, thread};

use clap::Parser;
use miette::{miette, Result};
use time::{format_description, OffsetDateTime};
use tracing::{debug, error, info};

use vidfetch::{
    cache::MetadataCache,
    catalog::{self, format_duration, format_filesize},
    history::{HistoryDb, HistoryRecord, Outcome, Sqlite},
    logging::init_logging,
    orchestrator::{DownloadOptions, Event, Orchestrator, Stage},
    outside::{Ffmpeg, Ytdl, FFMPEG},
    queue::{DownloadQueue, TaskStatus},
    resolver::MetadataResolver,
    settings::Settings,
    types::{FormatDescriptor, FormatId},
    video_url::VideoUrl,
};

use crate::cli::{Args, Command, DownloadArgs};

fn main() -> Result<()> {
    let args = Args::parse();

    let mut settings = Settings::load(args.config.as_deref())?;
    args.override_settings(&mut settings);
    init_logging(args.log_level(settings.log_level()?))?;
    debug!("{settings:?}");

    let cache = Arc::new(MetadataCache::new(&settings.cache_dir, settings.freshness()));

    match args.command {
        Command::Info { url, .. } => show_info(&url, &settings, cache),
        Command::Download(download) => run_download(download, &settings, cache),
        Command::History { url, limit, failed } => {
            show_history(url.as_deref(), limit, failed, &settings)
        }
        Command::ClearHistory { older_than_days } => {
            let history = Sqlite::read_or_create(&settings.history_file)?;
            let removed = match older_than_days {
                Some(days) => {
                    let now = OffsetDateTime::now_utc().unix_timestamp();
                    history.delete_before(now - i64::from(days) * 24 * 60 * 60)?
                }
                None => history.clear()?,
            };
            println!(
                "Removed {removed} downloads from {}",
                settings.history_file.display()
            );
            Ok(())
        }
        Command::ClearCache => {
            let removed = cache.clear()?;
            println!("Removed {removed} cached documents from {}", cache.dir().display());
            Ok(())
        }
        Command::PruneCache => {
            let removed = cache.prune()?;
            println!(
                "Removed {removed} expired cached documents from {}",
                cache.dir().display()
            );
            Ok(())
        }
    }
}

/// Load the external components
fn load_external_components(settings: &Settings, check_ffmpeg: bool) -> Result<(Ytdl, Ffmpeg)> {
    // Check the programs concurrently as executing an external program
    // is not instantaneous. That way we can avoid adding the costs
    thread::scope(|s| -> Result<(Ytdl, Ffmpeg)> {
        let ytdl_thread = s.spawn(|| match &settings.ytdlp_path {
            Some(path) => Ok(Ytdl::with_program(path)),
            None => Ytdl::new(),
        });
        let ffmpeg_thread = s.spawn(|| match &settings.ffmpeg_path {
            Some(path) => Ok(Ffmpeg::with_program(path)),
            None if check_ffmpeg => Ffmpeg::new(),
            None => Ok(Ffmpeg::with_program(FFMPEG)),
        });

        let ytdl = ytdl_thread
            .join()
            .map_err(|_| miette!("Could not join thread"))??;
        let ffmpeg = ffmpeg_thread
            .join()
            .map_err(|_| miette!("Could not join thread"))??;

        debug!("Using {:?} and {:?}", ytdl.program(), ffmpeg.program());
        Ok((
            ytdl.with_ffmpeg_location(settings.ffmpeg_path.clone()),
            ffmpeg,
        ))
    })
}

fn show_info(url: &str, settings: &Settings, cache: Arc<MetadataCache>) -> Result<()> {
    let url = VideoUrl::parse(url)?;
    let (ytdl, _) = load_external_components(settings, false)?;
    let resolver = MetadataResolver::new(Arc::new(ytdl), cache);

    let document = resolver.resolve(url.as_str(), settings.cookies.as_deref())?;

    println!("{}", document.title);
    println!("  id:       {}", document.id);
    println!("  uploader: {}", document.uploader);
    if let Some(duration) = document.duration {
        println!("  duration: {}", format_duration(duration));
    }
    println!("  views:    {}", document.view_count);
    println!("  likes:    {}", document.like_count);
    if document.is_live {
        println!("  live broadcast in progress, cannot be downloaded");
    }

    let formats = catalog::list_formats(&document);
    print_formats("Video formats", &catalog::video_formats(formats));
    print_formats("Audio formats", &catalog::audio_formats(formats));

    Ok(())
}

fn print_formats(header: &str, formats: &[&FormatDescriptor]) {
    if formats.is_empty() {
        return;
    }

    println!();
    println!("{header}:");
    for format in formats {
        println!("  {:>8}  {}", format.id.as_str(), format.label());
    }
}

fn run_download(args: DownloadArgs, settings: &Settings, cache: Arc<MetadataCache>) -> Result<()> {
    let (ytdl, ffmpeg) = load_external_components(settings, settings.prefer_normalized)?;

    let mut orchestrator = Orchestrator::new(Arc::new(ytdl), Arc::new(ffmpeg), cache)
        .with_normalized(settings.normalized)
        .keep_source(settings.keep_source);

    if settings.record_history {
        let history = Arc::new(Sqlite::read_or_create(&settings.history_file)?);
        for url in &args.urls {
            let previous = history
                .latest_for_url(url)?
                .filter(|record| record.entry.outcome == Outcome::Completed)
                .and_then(|record| record.entry.file_path)
                .filter(|path| path.exists());
            if let Some(path) = previous {
                info!("{url} was already downloaded to {path:?}");
            }
        }
        orchestrator = orchestrator.with_history(history);
    }

    let options = DownloadOptions {
        video_format: args.video_format.map(FormatId::new),
        audio_format: args.audio_format.map(FormatId::new),
        output_dir: settings.output_dir.clone(),
        cookies: settings.cookies.clone(),
        prefer_normalized: settings.prefer_normalized,
    };

    let queue = DownloadQueue::new(orchestrator);
    let total = queue.push_all(args.urls, &options).len();
    let summary = queue.run(&mut |_, event| print_event(event));
    // End the progress line
    eprintln!();

    for task in queue.tasks() {
        match task.status {
            TaskStatus::Completed(path) => println!("{}", path.display()),
            TaskStatus::Failed(reason) => error!("Could not download {}: {reason}", task.url),
            TaskStatus::Cancelled => info!("Download of {} cancelled", task.url),
            TaskStatus::Pending | TaskStatus::Running => (),
        }
    }

    info!(
        "{} downloads completed, {} failed, {} cancelled",
        summary.completed, summary.failed, summary.cancelled
    );
    if summary.failed > 0 {
        Err(miette!("{} of {total} downloads failed", summary.failed))
    } else {
        Ok(())
    }
}

fn show_history(
    url: Option<&str>,
    limit: usize,
    failed: bool,
    settings: &Settings,
) -> Result<()> {
    let history = Sqlite::read_or_create(&settings.history_file)?;

    let records = match url {
        Some(url) => history.latest_for_url(url)?.into_iter().collect(),
        None => history.recent(limit, failed.then_some(Outcome::Failed))?,
    };
    for record in &records {
        print_record(record)?;
    }

    let stats = history.statistics()?;
    if !records.is_empty() {
        println!();
    }
    println!(
        "{} downloads: {} completed ({}), {} failed, {} cancelled",
        stats.total,
        stats.completed,
        format_filesize(stats.total_size),
        stats.failed,
        stats.cancelled
    );
    Ok(())
}

fn print_record(record: &HistoryRecord) -> Result<()> {
    let entry = &record.entry;
    let format = format_description::parse("[year]-[month]-[day] [hour]:[minute]")
        .map_err(|err| miette!("Invalid date format: {err}"))?;
    let finished = OffsetDateTime::from_unix_timestamp(entry.finished_at)
        .ok()
        .and_then(|date| date.format(&format).ok())
        .unwrap_or_default();

    println!("{finished}  {:<9}  {}  {}", entry.outcome, entry.title, entry.url);
    if let Some(path) = &entry.file_path {
        let size = entry.size.map(format_filesize).unwrap_or_default();
        println!("    {} {size}", path.display());
    }
    if let Some(error) = &entry.error {
        println!("    {}", error.lines().next().unwrap_or_default());
    }
    Ok(())
}

fn print_event(event: &Event) {
    match event {
        Event::Stage(Stage::Resolving) => info!("Fetching the video metadata"),
        Event::Stage(Stage::Downloading) => info!("Downloading"),
        Event::Stage(Stage::Normalizing) => {
            eprintln!();
            info!("Converting to the normalized container");
        }
        Event::Resolved(document) => info!("Found {:?} by {}", document.title, document.uploader),
        Event::Progress(progress) => {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(
                stderr,
                "\r{:>5.1}%  {:>12}  ETA {:<8}",
                progress.fraction * 100.0,
                progress.speed,
                progress.eta
            );
            let _ = stderr.flush();
        }
    }
}
