pub mod announce;
pub mod cli;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod datastore;
pub mod datetime;
pub mod event;
pub mod ledger;
pub mod notify;
pub mod render;
pub mod repository;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::announce::{
  CommandAnnouncer,
  CommandSoundPlayer
};
use crate::coordinator::{
  AlarmCoordinator,
  CoordinatorOptions
};
use crate::ledger::JsonAlarmStore;
use crate::notify::SpoolScheduler;
use crate::repository::JsonEventRepository;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting voxcal"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let store =
    datastore::DataStore::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open datastore at \
         {}",
        data_dir.display()
      )
    })?;

  let coordinator =
    AlarmCoordinator::new(
      Box::new(
        JsonEventRepository::new(
          store.clone()
        )
      ),
      Box::new(JsonAlarmStore::new(
        store.clone()
      )),
      Box::new(SpoolScheduler::new(
        store
      )),
      Box::new(
        CommandAnnouncer::from_config(
          &cfg
        )?
      ),
      Box::new(
        CommandSoundPlayer::from_config(
          &cfg
        )
      )
    )
    .with_options(CoordinatorOptions {
      snooze_replaces_chain: cfg
        .get_bool(
          "snooze.replace_chain"
        )?
    });

  let renderer =
    render::Renderer::new(&cfg)?;
  let command = cli
    .command
    .unwrap_or(cli::Command::List {
      all: false
    });

  commands::dispatch(
    &coordinator,
    &cfg,
    &renderer,
    command
  )?;

  info!("done");
  Ok(())
}
