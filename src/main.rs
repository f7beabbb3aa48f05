//! Binary entry point for the Strata CLI.
//!
//! Results are written to stdout as JSON. Errors go to stderr; the exit code
//! is 1 for client errors and 2 for server errors or partially applied scale
//! requests.

mod cli;

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use strata::config::{ConfigError, StrataConfig};
use strata::logging::{self, LoggingError};
use strata::model::{
    Credentials, DesiredScale, FlavorParams, FormationId, LayerId, LayerPatch, NewFlavor,
    NewFormation, NewLayer, NewProvider, PrivateKey, ProviderKind, ProviderPatch, RunList,
    ValidationError,
};
use strata::{Adapters, MockProvider, Platform, PlatformError, ScalewayFactory, Store, StoreError};

use cli::{
    Cli, Command, FlavorCommand, FormationCommand, LayerCommand, LayerCreate, LayerUpdate,
    ProviderCommand, ScaleCommand,
};

const EXIT_CLIENT: i32 = 1;
const EXIT_SERVER: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Logging(#[from] LoggingError),
    #[error("invalid argument: {0}")]
    Usage(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Platform(#[from] PlatformError),
    #[error("failed to write output: {0}")]
    Output(String),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Platform(err) if err.is_client_error() => EXIT_CLIENT,
            Self::Config(_)
            | Self::Logging(_)
            | Self::Usage(_)
            | Self::Invalid(_)
            | Self::Read { .. } => EXIT_CLIENT,
            Self::Platform(_) | Self::Store(_) | Self::Output(_) => EXIT_SERVER,
        }
    }
}

enum Outcome {
    Done,
    Partial,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(Outcome::Done) => 0,
        Ok(Outcome::Partial) => EXIT_SERVER,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn run(cli: Cli) -> Result<Outcome, CliError> {
    let config = load_config(cli.state_dir.as_deref())?;
    logging::init(&config.log_filter, config.log_json)?;

    let store = Store::open(&config.state_path())?;
    let mock = MockProvider::new()
        .with_containers_per_node(config.containers_per_node)
        .resume_from(&store)?;
    let adapters = Adapters::new()
        .with(ProviderKind::Mock, Arc::new(mock))
        .with(ProviderKind::Scaleway, Arc::new(ScalewayFactory));
    let platform =
        Platform::new(Arc::new(store), adapters).with_concurrency(config.provider_concurrency);

    dispatch(&platform, &cli.owner, cli.command).await
}

fn load_config(state_dir: Option<&str>) -> Result<StrataConfig, CliError> {
    let mut config = StrataConfig::load_without_cli_args()?;
    if let Some(dir) = state_dir {
        dir.clone_into(&mut config.state_dir);
    }
    config.validate()?;
    Ok(config)
}

async fn dispatch(
    platform: &Platform<Store>,
    owner: &str,
    command: Command,
) -> Result<Outcome, CliError> {
    match command {
        Command::Provider(cmd) => provider(platform, owner, cmd),
        Command::Flavor(FlavorCommand::Create {
            id,
            provider,
            params,
        }) => {
            let input = NewFlavor {
                id: id.into(),
                provider: provider.into(),
                params: FlavorParams::from_json(&params)?,
            };
            emit(&platform.create_flavor(owner, input)?)
        }
        Command::Formation(cmd) => formation(platform, owner, cmd).await,
        Command::Layer(cmd) => layer(platform, owner, cmd).await,
        Command::Nodes(arg) => emit(&platform.list_nodes(&arg.formation.into())?),
        Command::Scale(cmd) => scale(platform, cmd).await,
        Command::Summary(arg) => emit(&platform.summarize(&arg.formation.into())?),
    }
}

fn provider(
    platform: &Platform<Store>,
    owner: &str,
    command: ProviderCommand,
) -> Result<Outcome, CliError> {
    match command {
        ProviderCommand::Create { id, kind, creds } => {
            let input = NewProvider {
                id: id.into(),
                kind: kind.parse()?,
                creds: Credentials::from_json(&creds)?,
            };
            emit(&platform.create_provider(owner, input)?)
        }
        ProviderCommand::Creds { id, creds } => {
            let patch = ProviderPatch {
                creds: Some(Credentials::from_json(&creds)?),
            };
            emit(&platform.patch_provider(&id.into(), patch)?)
        }
    }
}

async fn formation(
    platform: &Platform<Store>,
    owner: &str,
    command: FormationCommand,
) -> Result<Outcome, CliError> {
    match command {
        FormationCommand::Create(arg) => {
            let input = NewFormation {
                id: arg.formation.into(),
            };
            emit(&platform.create_formation(owner, input)?)
        }
        FormationCommand::Show(arg) => emit(&platform.get_formation(&arg.formation.into())?),
        FormationCommand::Delete(arg) => {
            let id = FormationId::from(arg.formation);
            platform.delete_formation(&id).await?;
            emit(&serde_json::json!({ "deleted": id }))
        }
    }
}

async fn layer(
    platform: &Platform<Store>,
    owner: &str,
    command: LayerCommand,
) -> Result<Outcome, CliError> {
    match command {
        LayerCommand::Create(args) => {
            let formation = FormationId::from(args.formation.as_str());
            let input = new_layer(args)?;
            emit(&platform.create_layer(owner, &formation, input)?)
        }
        LayerCommand::Update(args) => {
            let formation = FormationId::from(args.formation.as_str());
            let layer = LayerId::from(args.layer.as_str());
            let patch = layer_patch(args)?;
            emit(&platform.patch_layer(&formation, &layer, patch).await?)
        }
        LayerCommand::Delete { formation, layer } => {
            let layer_id = LayerId::from(layer);
            platform
                .delete_layer(&FormationId::from(formation), &layer_id)
                .await?;
            emit(&serde_json::json!({ "deleted": layer_id }))
        }
        LayerCommand::List(arg) => emit(&platform.list_layers(&arg.formation.into())?),
    }
}

fn new_layer(args: LayerCreate) -> Result<NewLayer, CliError> {
    Ok(NewLayer {
        id: args.layer.into(),
        flavor: args.flavor.into(),
        run_list: RunList::new(args.run_list),
        ssh_public_key: args.ssh_public_key,
        ssh_private_key: read_private_key(args.ssh_private_key_file.as_deref())?,
        proxy: args.proxy,
    })
}

fn layer_patch(args: LayerUpdate) -> Result<LayerPatch, CliError> {
    Ok(LayerPatch {
        flavor: args.flavor.map(Into::into),
        run_list: args.run_list.map(RunList::new),
        ssh_public_key: args.ssh_public_key,
        ssh_private_key: read_private_key(args.ssh_private_key_file.as_deref())?,
        proxy: args.proxy,
    })
}

async fn scale(platform: &Platform<Store>, command: ScaleCommand) -> Result<Outcome, CliError> {
    let pairs = command
        .targets
        .iter()
        .map(String::as_str)
        .map(parse_target)
        .collect::<Result<Vec<_>, _>>()?;
    let desired = DesiredScale::from_pairs(pairs)?;
    let outcome = platform.scale(&command.formation.into(), &desired).await?;
    emit(&outcome)?;
    if outcome.is_partial() {
        writeln!(
            io::stderr(),
            "scale applied partially: {} provider call(s) failed",
            outcome.failures.len()
        )
        .ok();
        return Ok(Outcome::Partial);
    }
    Ok(Outcome::Done)
}

fn parse_target(raw: &str) -> Result<(String, i64), CliError> {
    let (layer, count) = raw
        .split_once('=')
        .ok_or_else(|| CliError::Usage(format!("expected LAYER=COUNT, got {raw:?}")))?;
    let parsed = count
        .trim()
        .parse::<i64>()
        .map_err(|_| CliError::Usage(format!("count for {layer} is not an integer: {count:?}")))?;
    Ok((layer.trim().to_owned(), parsed))
}

fn read_private_key(path: Option<&str>) -> Result<Option<PrivateKey>, CliError> {
    let Some(raw) = path else {
        return Ok(None);
    };
    let read_err = |message: String| CliError::Read {
        path: raw.to_owned(),
        message,
    };
    let file = Utf8Path::new(raw);
    let parent = file
        .parent()
        .filter(|dir| !dir.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let name = file
        .file_name()
        .ok_or_else(|| read_err(String::from("path has no file name")))?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())
        .map_err(|err| read_err(err.to_string()))?;
    let contents = dir
        .read_to_string(name)
        .map_err(|err| read_err(err.to_string()))?;
    Ok(Some(PrivateKey::new(contents)))
}

fn emit<T: Serialize>(value: &T) -> Result<Outcome, CliError> {
    write_json(io::stdout(), value)?;
    Ok(Outcome::Done)
}

fn write_json<T: Serialize>(mut target: impl Write, value: &T) -> Result<(), CliError> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| CliError::Output(err.to_string()))?;
    writeln!(target, "{rendered}").map_err(|err| CliError::Output(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "error: {err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("runtime=3", "runtime", 3)]
    #[case(" proxy = 0 ", "proxy", 0)]
    #[case("runtime=-1", "runtime", -1)]
    fn parses_scale_targets(#[case] raw: &str, #[case] layer: &str, #[case] count: i64) {
        assert_eq!(
            parse_target(raw).expect("target"),
            (layer.to_owned(), count)
        );
    }

    #[rstest]
    #[case("runtime")]
    #[case("runtime=two")]
    fn rejects_malformed_targets(#[case] raw: &str) {
        let err = parse_target(raw).expect_err("malformed");
        assert!(matches!(err, CliError::Usage(_)));
        assert_eq!(err.exit_code(), EXIT_CLIENT);
    }

    #[rstest]
    fn platform_errors_follow_their_classification() {
        let missing = CliError::Platform(PlatformError::NotFound {
            kind: strata::store::RecordKind::Formation,
            id: "ghost".to_owned(),
        });
        assert_eq!(missing.exit_code(), EXIT_CLIENT);

        let store = CliError::Store(StoreError::Poisoned);
        assert_eq!(store.exit_code(), EXIT_SERVER);
    }

    #[rstest]
    fn write_json_emits_pretty_documents() {
        let mut buf = Vec::new();
        write_json(&mut buf, &serde_json::json!({ "deleted": FormationId::from("f") }))
            .expect("write");
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "{\n  \"deleted\": \"f\"\n}\n");
    }

    #[rstest]
    fn write_error_prefixes_the_message() {
        let mut buf = Vec::new();
        write_error(&mut buf, &CliError::Usage("bad".to_owned()));
        let rendered = String::from_utf8(buf).expect("utf8");
        assert_eq!(rendered, "error: invalid argument: bad\n");
    }
}
