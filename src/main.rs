fn main() -> anyhow::Result<()> {
    certtrack_lib::run()
}
