//! Exact-match route table.

/// What a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A monitor section by name.
    Section(&'static str),
    /// The HTML endpoint listing.
    Api,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    pub path: &'static str,
    pub route: Route,
    pub description: &'static str,
}

pub const ROUTES: &[RouteEntry] = &[
    RouteEntry {
        path: "/",
        route: Route::Section("status"),
        description: "Server status",
    },
    RouteEntry {
        path: "/status",
        route: Route::Section("status"),
        description: "Server status (same as /)",
    },
    RouteEntry {
        path: "/cpu",
        route: Route::Section("cpu"),
        description: "CPU model, usage, per-core frequency, temperature",
    },
    RouteEntry {
        path: "/gpu",
        route: Route::Section("gpu"),
        description: "GPU backend, usage, frequency, temperature",
    },
    RouteEntry {
        path: "/memory",
        route: Route::Section("memory"),
        description: "Memory, swap and storage",
    },
    RouteEntry {
        path: "/battery",
        route: Route::Section("battery"),
        description: "Battery level, voltage, current, power, status",
    },
    RouteEntry {
        path: "/display",
        route: Route::Section("display"),
        description: "Frame rate estimate and foreground app summary",
    },
    RouteEntry {
        path: "/system",
        route: Route::Section("system"),
        description: "Platform identity and uptime",
    },
    RouteEntry {
        path: "/current-app",
        route: Route::Section("current-app"),
        description: "Foreground application with icon",
    },
    RouteEntry {
        path: "/current",
        route: Route::Section("current-app"),
        description: "Foreground application (same as /current-app)",
    },
    RouteEntry {
        path: "/summary",
        route: Route::Section("summary"),
        description: "Headline numbers from every section",
    },
    RouteEntry {
        path: "/all",
        route: Route::Section("all"),
        description: "Every section in one response",
    },
    RouteEntry {
        path: "/api",
        route: Route::Api,
        description: "This page",
    },
];

pub fn lookup(path: &str) -> Option<Route> {
    ROUTES.iter().find(|e| e.path == path).map(|e| e.route)
}

/// Static HTML listing every route, with curl examples against `port`.
pub fn api_page(port: u16) -> String {
    let items: String = ROUTES
        .iter()
        .map(|e| format!("<li><strong>GET {}</strong> - {}</li>", e.path, e.description))
        .collect();
    let examples: Vec<String> = ["/cpu", "/gpu", "/memory", "/battery", "/summary"]
        .iter()
        .map(|p| format!("curl http://localhost:{port}{p}"))
        .collect();
    format!(
        "<!DOCTYPE html>\
         <html><head><title>devicestat API</title></head>\
         <body>\
         <h1>devicestat API</h1>\
         <h2>Endpoints</h2>\
         <ul>{items}</ul>\
         <h2>Responses</h2>\
         <p>JSON with permissive CORS headers. Values that could not be read are \
         reported as -1 (numbers), \"Unknown\" (text) or null (flags).</p>\
         <h2>Examples</h2>\
         <pre>{}</pre>\
         </body></html>",
        examples.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use devicestat_core::SECTION_NAMES;

    #[test]
    fn exact_match_only() {
        assert_eq!(lookup("/cpu"), Some(Route::Section("cpu")));
        assert_eq!(lookup("/current"), Some(Route::Section("current-app")));
        assert_eq!(lookup("/api"), Some(Route::Api));
        assert_eq!(lookup("/cpu/"), None);
        assert_eq!(lookup("/cpu?x=1"), None);
        assert_eq!(lookup("/CPU"), None);
    }

    #[test]
    fn every_section_route_is_known_to_the_monitor() {
        for entry in ROUTES {
            if let Route::Section(name) = entry.route {
                assert!(SECTION_NAMES.contains(&name), "{}", entry.path);
            }
        }
    }

    #[test]
    fn api_page_lists_every_path() {
        let page = api_page(18888);
        for entry in ROUTES {
            assert!(page.contains(&format!("GET {}<", entry.path)), "{}", entry.path);
        }
        assert!(page.contains("curl http://localhost:18888/cpu"));
    }
}
