use tidemark_runner::StaticCatalog;

// The stock binary carries no migrations of its own; it is useful for
// `init`, `status` and inspecting ledgers. Applications build their own
// binary around `tidemark_cli::run_with`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tidemark_cli::run_with(StaticCatalog::new()).await
}
