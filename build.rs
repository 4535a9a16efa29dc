fn main() -> Result<(), anyhow::Error> {
	let proto_files = ["proto/service_control.proto"]
		.iter()
		.map(|name| std::env::current_dir().unwrap().join(name))
		.collect::<Vec<_>>();
	let include_dirs = ["proto/"]
		.iter()
		.map(|i| std::env::current_dir().unwrap().join(i))
		.collect::<Vec<_>>();

	// Plain protobuf messages, not gRPC: the Service-Control RPCs are
	// `application/x-protobuf` POSTs over plain HTTP (C5), so there is no
	// service stub to generate and no reflection descriptor needed.
	let mut config = prost_build::Config::new();
	config.bytes(["."]);
	config.compile_protos(
		&proto_files
			.iter()
			.map(|path| path.to_str().unwrap())
			.collect::<Vec<_>>(),
		&include_dirs
			.iter()
			.map(|p| p.to_str().unwrap())
			.collect::<Vec<_>>(),
	)?;

	for path in [proto_files, include_dirs].concat() {
		println!("cargo:rerun-if-changed={}", path.to_str().unwrap());
	}

	Ok(())
}
