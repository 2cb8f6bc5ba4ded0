#[macro_use]
extern crate log;

use std::env;

fn main() {
    env_logger::init();

    let path = env::args().skip(1).next().expect("argv[1]");

    let scan = skinscan::scan_path(&path).expect("failed to scan image");
    let analysis = scan.analyse();
    info!("analysis: {:?}", analysis);

    println!("{}", analysis.verdict());
}
