//! Command-line interface definitions for the `strata` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page. It
//! must not depend on the library crate.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `strata` binary.
#[derive(Debug, Parser)]
#[command(
    name = "strata",
    about = "Manage formations of cloud nodes and scale their layers",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Directory holding `state.json`; overrides `STRATA_STATE_DIR`.
    #[arg(long, global = true, value_name = "DIR")]
    pub(crate) state_dir: Option<String>,
    /// Owner recorded on created records.
    #[arg(long, global = true, default_value = "operator")]
    pub(crate) owner: String,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Resource subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Register and update cloud providers.
    #[command(subcommand)]
    Provider(ProviderCommand),
    /// Define instance flavors.
    #[command(subcommand)]
    Flavor(FlavorCommand),
    /// Create, inspect and delete formations.
    #[command(subcommand)]
    Formation(FormationCommand),
    /// Manage the layers of a formation.
    #[command(subcommand)]
    Layer(LayerCommand),
    /// List the nodes of a formation.
    Nodes(FormationArg),
    /// Scale layers to the given node counts.
    Scale(ScaleCommand),
    /// Summarise a formation's nodes, containers and release.
    Summary(FormationArg),
}

/// `strata provider` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum ProviderCommand {
    /// Register a provider.
    Create {
        /// Provider identifier.
        id: String,
        /// Backend type: `mock` or `scaleway`.
        #[arg(long = "type", value_name = "TYPE")]
        kind: String,
        /// Credentials as a JSON object.
        #[arg(long, value_name = "JSON", default_value = "{}")]
        creds: String,
    },
    /// Replace a provider's credentials.
    Creds {
        /// Provider identifier.
        id: String,
        /// Credentials as a JSON object.
        creds: String,
    },
}

/// `strata flavor` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum FlavorCommand {
    /// Define a flavor bound to a provider.
    Create {
        /// Flavor identifier.
        id: String,
        /// Provider the flavor provisions through.
        #[arg(long)]
        provider: String,
        /// Parameters such as `region` and `instance_size`, as a JSON object.
        #[arg(long, value_name = "JSON", default_value = "{}")]
        params: String,
    },
}

/// `strata formation` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum FormationCommand {
    /// Create an empty formation.
    Create(FormationArg),
    /// Show a formation record.
    Show(FormationArg),
    /// Tear down every node and delete the formation.
    Delete(FormationArg),
}

/// Positional formation identifier.
#[derive(Debug, Args)]
pub(crate) struct FormationArg {
    /// Formation identifier.
    pub(crate) formation: String,
}

/// `strata layer` subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum LayerCommand {
    /// Attach a layer to a formation.
    Create(LayerCreate),
    /// Change selected fields of a layer.
    Update(LayerUpdate),
    /// Delete an empty layer.
    Delete {
        /// Formation identifier.
        formation: String,
        /// Layer identifier.
        layer: String,
    },
    /// List the layers of a formation.
    List(FormationArg),
}

/// Arguments for `strata layer create`.
#[derive(Debug, Args)]
pub(crate) struct LayerCreate {
    /// Formation identifier.
    pub(crate) formation: String,
    /// Layer identifier.
    pub(crate) layer: String,
    /// Flavor the layer's nodes use.
    #[arg(long)]
    pub(crate) flavor: String,
    /// Run-list applied to the layer's nodes.
    #[arg(long, default_value = "")]
    pub(crate) run_list: String,
    /// Tag the layer as a proxy layer; layers named `proxy` are tagged by default.
    #[arg(long)]
    pub(crate) proxy: Option<bool>,
    /// Public key installed on the layer's nodes.
    #[arg(long, value_name = "KEY")]
    pub(crate) ssh_public_key: Option<String>,
    /// File holding the private half of the keypair.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_private_key_file: Option<String>,
}

/// Arguments for `strata layer update`.
#[derive(Debug, Args)]
pub(crate) struct LayerUpdate {
    /// Formation identifier.
    pub(crate) formation: String,
    /// Layer identifier.
    pub(crate) layer: String,
    /// Replacement flavor; rejected while the layer has nodes.
    #[arg(long)]
    pub(crate) flavor: Option<String>,
    /// Replacement run-list.
    #[arg(long)]
    pub(crate) run_list: Option<String>,
    /// Replacement proxy tag.
    #[arg(long)]
    pub(crate) proxy: Option<bool>,
    /// Replacement public key.
    #[arg(long, value_name = "KEY")]
    pub(crate) ssh_public_key: Option<String>,
    /// File holding a replacement private key.
    #[arg(long, value_name = "PATH")]
    pub(crate) ssh_private_key_file: Option<String>,
}

/// Arguments for `strata scale`.
#[derive(Debug, Args)]
pub(crate) struct ScaleCommand {
    /// Formation identifier.
    pub(crate) formation: String,
    /// Targets as `layer=count`, in submission order.
    #[arg(required = true, value_name = "LAYER=COUNT")]
    pub(crate) targets: Vec<String>,
}
