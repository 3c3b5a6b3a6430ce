use std::sync::Arc;

use argh::FromArgs;

use super::listener::Listener;
use super::ServerContext;
use crate::command::Error;
use crate::configuration::Configuration;
use crate::policy::PolicyOverride;
use crate::task_queue::TaskQueue;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "server",
    description = "Run the policy enforcing registry front-end"
)]
pub struct Options {}

pub struct Command {
    listener: Listener,
    policy_override: Option<PolicyOverride>,
    task_queue: Arc<TaskQueue>,
}

impl Command {
    /// `policy_override` and `task_queue` outlive configuration reloads.
    pub fn new(
        config: &Configuration,
        policy_override: Option<PolicyOverride>,
        task_queue: Arc<TaskQueue>,
    ) -> Result<Command, Error> {
        let context = ServerContext::new(config, policy_override, Arc::clone(&task_queue))?;
        let listener = Listener::new(&config.server, context);

        Ok(Command {
            listener,
            policy_override,
            task_queue,
        })
    }

    pub fn notify_config_change(&self, config: &Configuration) -> Result<(), Error> {
        let context = ServerContext::new(
            config,
            self.policy_override,
            Arc::clone(&self.task_queue),
        )?;
        self.listener.notify_config_change(&config.server, context);

        Ok(())
    }

    pub async fn run(&self) -> Result<(), Error> {
        self.listener.serve().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::server::server_context::tests::TEST_CONFIG;

    fn create_command() -> Command {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let config = Configuration::load_from_str(TEST_CONFIG).unwrap();
        let task_queue = Arc::new(TaskQueue::new(1).unwrap());
        Command::new(&config, None, task_queue).unwrap()
    }

    #[test]
    fn test_command_new() {
        let command = create_command();
        assert!(command.policy_override.is_none());
    }

    #[test]
    fn test_notify_config_change() {
        let command = create_command();

        let trust = r#"
        [trust]
        url = "https://127.0.0.1:4443"
        registry_host = "registry.example.com"
        "#;
        let config = Configuration::load_from_str(&format!("{TEST_CONFIG}{trust}")).unwrap();

        assert!(command.notify_config_change(&config).is_ok());
    }

    #[test]
    fn test_notify_config_change_with_invalid_backend() {
        let command = create_command();

        let config = format!("{TEST_CONFIG}\n[scanner.redis]\nurl = \"not a redis url\"\n");
        let config = Configuration::load_from_str(&config).unwrap();

        assert!(matches!(
            command.notify_config_change(&config),
            Err(Error::Configuration(_))
        ));
    }
}
