#[macro_use]
extern crate log;

use image::GenericImageView;
use std::env;

fn main() {
    env_logger::init();

    let path = env::args().skip(1).next().expect("argv[1]");

    let mut img = image::open(path).expect("failed to open");
    info!("dimensions {:?}", img.dimensions());

    let scan = skinscan::scan(&img).expect("failed to scan image");
    scan.colorize_regions(&mut img);
    img.save("output.jpg").expect("failed to save");
}
