use std::path::PathBuf;

use env_logger;

use structopt::StructOpt;

use sensor_logger::runtime;

#[derive(StructOpt, Debug)]
#[structopt(name = "sensor_logger")]
struct Opt {
	/// Configuration file
	#[structopt(short, long, default_value = "config.toml", parse(from_os_str))]
	config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	env_logger::init();
	let opt = Opt::from_args();
	let config_s = std::fs::read_to_string(&opt.config)?;
	let config: runtime::Config = toml::from_str(&config_s)?;
	let runtime = config.build()?;
	runtime.run().await;
	Ok(())
}
