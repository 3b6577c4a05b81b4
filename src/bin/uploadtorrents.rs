//! Upload torrent files and magnet links to the configured seedbox

use clap::Parser;
use seedboxtools::cli::{self, UploadArgs};

fn main() {
    let args = UploadArgs::parse();
    std::process::exit(cli::uploadtorrents(args));
}
