pub mod audit;
pub mod guard;
pub mod ledger;
pub mod notifier;
pub mod orchestrator;
pub mod sweeper;
pub mod validator;
