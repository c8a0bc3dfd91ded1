use devicestat_server::routes::{ROUTES, Route};

pub fn run() {
    println!("{:<14} {:<12} DESCRIPTION", "PATH", "SECTION");
    for entry in ROUTES {
        let section = match entry.route {
            Route::Section(name) => name,
            Route::Api => "(html)",
        };
        println!("{:<14} {:<12} {}", entry.path, section, entry.description);
    }
}
