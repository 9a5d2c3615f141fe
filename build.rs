// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::{env, fs::File, path::Path};

fn main() {
    // This block of code forces stefcal to recompile its binaries everytime we
    // do a release build.
    if env::var("DEBUG").as_deref() == Ok("false") {
        let out_dir = env::var("OUT_DIR").expect("OUT_DIR env. variable not defined!");
        let p = Path::new(&out_dir).join("rebuild_stamp");
        File::create(&p).expect("Couldn't create the rebuild stamp");
        println!("cargo:rerun-if-changed={}", p.display());
    }

    // Use the "built" crate to generate some useful build-time information,
    // including the compiler version and build time.
    built::write_built_file().expect("Failed to acquire build-time information");
}
