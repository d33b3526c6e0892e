mod cli;
mod error;
mod output;

use crate::{
    cli::Args,
    error::{AppError, Result},
    output::EventPrinter,
};
use clap::Parser;
use hlsmon_engine::{
    Downloader, Event, MessageDispatcher, MonitorConfig, RecordConfig, SessionReport,
    TransferConfig,
};
use std::{process, sync::Arc, thread, time::Duration};
use tracing::{Level, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args) {
        Ok(report) => {
            info!(
                "Downloaded {} segment(s), {} failed, {} bytes",
                report.downloaded, report.failed, report.bytes
            );
            if report.stopped {
                process::exit(130);
            }
        }
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn build_config(args: &Args) -> Result<MonitorConfig> {
    if !args.url.contains("://") {
        return Err(AppError::InvalidInput(format!(
            "`{}` is not an absolute URL",
            args.url
        )));
    }

    let mut transfer =
        TransferConfig::default().with_idle_timeout(Duration::from_secs(args.idle_timeout.max(1)));
    if let Some(mut proxy) = args.proxy.clone() {
        if let Some(proxy_type) = args.proxy_type {
            proxy.proxy_type = proxy_type;
        }
        transfer = transfer.with_proxy(proxy);
    }

    let mut config = MonitorConfig::new(args.url.clone()).with_transfer(transfer);
    if args.record {
        let mut record = RecordConfig::new(&args.output)
            .with_realtime(args.realtime)
            .with_continue(args.continue_download);
        if let Some(name) = &args.name {
            record = record.with_name(name.clone());
        }
        config = config.with_record(record);
    }
    Ok(config)
}

fn run(args: Args) -> Result<SessionReport> {
    let config = build_config(&args)?;

    let dispatcher = MessageDispatcher::start()?;
    dispatcher.set_callback(EventPrinter::new(args.json));

    let downloader = Arc::new(Downloader::with_http(config, dispatcher.clone())?);
    {
        let downloader = Arc::clone(&downloader);
        ctrlc::set_handler(move || downloader.stop())?;
    }

    let finished = Arc::new(Event::manual());
    let poller = (args.buffer_interval > 0).then(|| {
        let downloader = Arc::clone(&downloader);
        let finished = Arc::clone(&finished);
        let interval = Duration::from_secs(args.buffer_interval);
        thread::Builder::new()
            .name("hls-buffer".to_string())
            .spawn(move || {
                while !finished.wait(interval) {
                    let buffer = downloader.buffer_duration();
                    info!(
                        "Buffer {:.1}s, {} segment(s) pending",
                        buffer.seconds,
                        downloader.pending_segments()
                    );
                }
            })
    });

    let result = downloader.run();

    finished.set();
    if let Some(Ok(handle)) = poller {
        let _ = handle.join();
    }
    dispatcher.shutdown();
    Ok(result?)
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
