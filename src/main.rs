fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    onepw_receiver::cli::main()
}
