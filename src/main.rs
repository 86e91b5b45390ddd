use kube_enlist::config::Config;
use kube_enlist::context;
use kube_enlist::control_plane::HttpControlPlane;
use kube_enlist::provider::TokenProvider;
use kube_enlist::registrar::{KubeConnector, Registrar, RunState};
use kube_enlist::reporter::{Reporter, TableReporter};
use log::{info, warn};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::new_from_flags();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level())).init();

    let kubeconfig = context::load_kubeconfig(&config.kubeconfig_path)?;
    let targets = context::resolve(kubeconfig, &config.selection);

    let control_plane = HttpControlPlane::new(&config.api_host, &config.api_token);
    let registrar = Registrar::new(
        KubeConnector::new(config.in_cluster_fallback),
        control_plane,
        TokenProvider::default(),
    );

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, reporting what has been collected so far");
            interrupt.cancel();
        }
    });

    let mut reporter = TableReporter::new();
    let state = registrar.run(targets, &mut reporter, &cancel).await;
    reporter.render(&mut std::io::stdout().lock())?;

    if state == RunState::Interrupted {
        std::process::exit(1);
    }
    info!("Operation is done, check your account setting");
    Ok(())
}
