use std::{collections::HashMap, io, process::ExitCode};

use clap::{Arg, ArgMatches, Command};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, span, Level};
use tracing_subscriber::EnvFilter;

use tardigrade::{
    adapters::s3::S3Connector,
    config::{self, Config},
    model::entry::format_timestamp,
    BlockingTardigrade, Error, Result,
};

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let span = span!(Level::INFO, "main", context = "main");
    let _e = span.enter();
    info!("called");

    let matches = command().get_matches();
    match run(&matches) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "command failed");
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn command() -> Command {
    let mut command = Command::new(config::PROTOCOL_KEY)
        .about(config::DESCRIPTION)
        .subcommand_required(true)
        .arg(
            Arg::new("url")
                .long("url")
                .global(true)
                .help("Backend url of the form tardigrade://bucket/folder"),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .global(true)
                .help("S3 gateway endpoint, overrides the one derived from the access"),
        )
        .arg(
            Arg::new("region")
                .long("region")
                .global(true)
                .help("Region reported to the S3 gateway"),
        );

    for option in config::supported_options() {
        let mut arg = Arg::new(option.name)
            .long(option.name)
            .global(true)
            .help(option.short)
            .long_help(option.long);
        // Config applies defaults so a url can still supply the bucket.
        if let Some(default) = option.default {
            arg = arg.help(format!("{} [default: {}]", option.short, default));
        }
        command = command.arg(arg);
    }

    command
        .subcommand(Command::new("list").about("List the files in the folder"))
        .subcommand(
            Command::new("get")
                .about("Download a file, to stdout when no path is given")
                .arg(Arg::new("NAME").required(true).index(1))
                .arg(Arg::new("PATH").index(2)),
        )
        .subcommand(
            Command::new("put")
                .about("Upload a file, from stdin when no path is given")
                .arg(Arg::new("NAME").required(true).index(1))
                .arg(Arg::new("PATH").index(2)),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a file")
                .arg(Arg::new("NAME").required(true).index(1)),
        )
        .subcommand(Command::new("test").about("Check credentials and connectivity"))
        .subcommand(Command::new("create-folder").about("Does nothing, buckets have no folders"))
        .subcommand(Command::new("satellites").about("Print the known satellites"))
}

fn options(matches: &ArgMatches) -> HashMap<String, String> {
    config::supported_options()
        .into_iter()
        .filter_map(|option| {
            matches
                .get_one::<String>(option.name)
                .map(|value| (option.name.to_string(), value.clone()))
        })
        .collect()
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| Error::Configuration(format!("missing argument: {}", id)))
}

fn run(matches: &ArgMatches) -> Result<()> {
    if let Some(("satellites", _)) = matches.subcommand() {
        for (name, address) in config::KNOWN_SATELLITES {
            println!("{}\t{}", name, address);
        }
        return Ok(());
    }

    let options = options(matches);
    let config = match matches.get_one::<String>("url") {
        Some(url) => Config::from_url(url, &options)?,
        None => Config::from_options(&options)?,
    };
    info!(bucket = %config.bucket, folder = config.folder.as_deref().unwrap_or(""), "config");

    let mut connector = S3Connector::new();
    if let Some(endpoint) = matches.get_one::<String>("endpoint") {
        connector = connector.with_endpoint(endpoint);
    }
    if let Some(region) = matches.get_one::<String>("region") {
        connector = connector.with_region(region);
    }

    let mut backend = BlockingTardigrade::connect(&config, &connector)?;
    let cancel = CancellationToken::new();

    let result = match matches.subcommand() {
        Some(("list", _)) => backend.list().map(|entries| {
            for entry in entries {
                let modified = entry
                    .last_modification
                    .map(format_timestamp)
                    .unwrap_or_default();
                println!("{}\t{}\t{}", entry.name, entry.size, modified);
            }
        }),
        Some(("get", sub)) => {
            let name = required(sub, "NAME")?;
            match sub.get_one::<String>("PATH") {
                Some(path) => backend.get(name, path),
                None => backend
                    .get_stream(name, &mut io::stdout().lock())
                    .map(|_| ()),
            }
        }
        Some(("put", sub)) => {
            let name = required(sub, "NAME")?;
            match sub.get_one::<String>("PATH") {
                Some(path) => backend.put_file(name, path, &cancel),
                None => backend.put(name, &mut io::stdin().lock(), &cancel),
            }
        }
        Some(("delete", sub)) => backend.delete(required(sub, "NAME")?),
        Some(("test", _)) => backend.test().map(|()| println!("connection ok")),
        Some(("create-folder", _)) => backend.create_folder(),
        _ => Err(Error::Configuration("unknown command".into())),
    };

    backend.dispose();
    result
}
