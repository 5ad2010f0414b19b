use {super::*, sieve::GpuBackendKind};

#[derive(Parser, Debug)]
pub(crate) struct Devices {
    #[arg(long, help = "List devices for <BACKEND> (opencl or cuda).")]
    backend: Option<String>,
}

#[derive(Debug, Serialize)]
struct Device {
    id: usize,
    name: String,
}

impl Devices {
    pub(crate) async fn run(&self) -> Result {
        let kind = self
            .backend
            .as_deref()
            .unwrap_or("opencl")
            .parse::<GpuBackendKind>()?;

        let devices: Vec<Device> = sieve::available_devices(kind)
            .into_iter()
            .enumerate()
            .map(|(id, name)| Device { id, name })
            .collect();

        println!("{}", serde_json::to_string_pretty(&devices)?);

        Ok(())
    }
}
