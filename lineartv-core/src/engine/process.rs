use std::io;
use std::process::Output;

use tokio::process::{Child, Command};

/// Runs a command to completion. Split out as a trait so ffprobe calls can
/// be stubbed in tests.
#[async_trait::async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait::async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> io::Result<Output> {
        command.output().await
    }
}

/// Spawns a long-lived child. The supervisor owns the returned handle and
/// monitors it until exit; tests substitute scripted children here.
pub trait SpawnExecutor: Send + Sync {
    fn spawn(&self, command: &mut Command) -> io::Result<Child>;
}

#[derive(Debug, Default)]
pub struct SystemSpawnExecutor;

impl SpawnExecutor for SystemSpawnExecutor {
    fn spawn(&self, command: &mut Command) -> io::Result<Child> {
        command.spawn()
    }
}
