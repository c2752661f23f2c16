pub fn run() -> anyhow::Result<()> {
    println!("kube-medic {}", env!("CARGO_PKG_VERSION"));
    Ok(())
}
