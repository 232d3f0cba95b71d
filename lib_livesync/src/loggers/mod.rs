/// Installs the `tracing` subscriber with console and file output.
pub mod loggerlocal;
