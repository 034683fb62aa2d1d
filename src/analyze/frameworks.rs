//! Framework detection from ecosystem manifests.
//!
//! Reads the manifests a repository actually ships (package.json,
//! Cargo.toml, requirements.txt / pyproject.toml, go.mod) and maps known
//! dependency names to framework labels. Parsing is deliberately shallow:
//! a dependency name either appears in a manifest or it doesn't.

use phf::phf_map;
use std::collections::BTreeSet;
use std::path::Path;

/// npm dependency name -> framework label.
static NPM_FRAMEWORKS: phf::Map<&'static str, &'static str> = phf_map! {
    "react" => "React",
    "next" => "Next.js",
    "vue" => "Vue.js",
    "nuxt" => "Nuxt",
    "svelte" => "Svelte",
    "@angular/core" => "Angular",
    "express" => "Express",
    "fastify" => "Fastify",
    "koa" => "Koa",
    "nestjs" => "NestJS",
    "@nestjs/core" => "NestJS",
};

/// Cargo dependency name -> framework label.
static CARGO_FRAMEWORKS: phf::Map<&'static str, &'static str> = phf_map! {
    "actix-web" => "Actix Web",
    "axum" => "Axum",
    "rocket" => "Rocket",
    "warp" => "Warp",
    "tauri" => "Tauri",
    "bevy" => "Bevy",
};

/// Python dependency name -> framework label.
static PYTHON_FRAMEWORKS: phf::Map<&'static str, &'static str> = phf_map! {
    "django" => "Django",
    "flask" => "Flask",
    "fastapi" => "FastAPI",
    "tornado" => "Tornado",
    "pyramid" => "Pyramid",
};

/// Go module path fragment -> framework label.
static GO_FRAMEWORKS: phf::Map<&'static str, &'static str> = phf_map! {
    "github.com/gin-gonic/gin" => "Gin",
    "github.com/labstack/echo" => "Echo",
    "github.com/gorilla/mux" => "Gorilla Mux",
    "github.com/gofiber/fiber" => "Fiber",
};

/// Detect frameworks used by the repository at `root`.
///
/// Returns sorted, deduplicated labels. Unreadable or malformed
/// manifests are skipped silently - detection is best-effort.
pub fn detect_frameworks(root: &Path) -> Vec<String> {
    let mut found: BTreeSet<&'static str> = BTreeSet::new();

    scan_package_json(root, &mut found);
    scan_cargo_toml(root, &mut found);
    scan_python_manifests(root, &mut found);
    scan_go_mod(root, &mut found);

    found.into_iter().map(String::from).collect()
}

fn scan_package_json(root: &Path, found: &mut BTreeSet<&'static str>) {
    let Ok(content) = std::fs::read_to_string(root.join("package.json")) else {
        return;
    };
    let Ok(manifest) = serde_json::from_str::<serde_json::Value>(&content) else {
        return;
    };
    for section in ["dependencies", "devDependencies"] {
        if let Some(deps) = manifest.get(section).and_then(|d| d.as_object()) {
            for name in deps.keys() {
                if let Some(&label) = NPM_FRAMEWORKS.get(name.as_str()) {
                    found.insert(label);
                }
            }
        }
    }
}

fn scan_cargo_toml(root: &Path, found: &mut BTreeSet<&'static str>) {
    let Ok(content) = std::fs::read_to_string(root.join("Cargo.toml")) else {
        return;
    };
    let mut in_dependencies = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_dependencies = line.starts_with("[dependencies")
                || line.starts_with("[dev-dependencies")
                || line.starts_with("[workspace.dependencies");
            continue;
        }
        if !in_dependencies {
            continue;
        }
        if let Some(name) = line.split(['=', ' ']).next() {
            if let Some(&label) = CARGO_FRAMEWORKS.get(name.trim()) {
                found.insert(label);
            }
        }
    }
}

fn scan_python_manifests(root: &Path, found: &mut BTreeSet<&'static str>) {
    for manifest in ["requirements.txt", "pyproject.toml"] {
        let Ok(content) = std::fs::read_to_string(root.join(manifest)) else {
            continue;
        };
        let lowered = content.to_ascii_lowercase();
        for (&dep, &label) in PYTHON_FRAMEWORKS.entries() {
            if lowered.contains(dep) {
                found.insert(label);
            }
        }
    }
}

fn scan_go_mod(root: &Path, found: &mut BTreeSet<&'static str>) {
    let Ok(content) = std::fs::read_to_string(root.join("go.mod")) else {
        return;
    };
    for (&module, &label) in GO_FRAMEWORKS.entries() {
        if content.contains(module) {
            found.insert(label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_detects_npm_frameworks() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("package.json"),
            r#"{"dependencies": {"react": "^18.0.0", "lodash": "^4.0.0"},
                "devDependencies": {"express": "^4.18.0"}}"#,
        )
        .unwrap();

        let frameworks = detect_frameworks(temp.path());
        assert_eq!(frameworks, vec!["Express", "React"]);
    }

    #[test]
    fn test_detects_cargo_frameworks() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("Cargo.toml"),
            "[package]\nname = \"svc\"\n\n[dependencies]\naxum = \"0.7\"\nserde = \"1\"\n",
        )
        .unwrap();

        let frameworks = detect_frameworks(temp.path());
        assert_eq!(frameworks, vec!["Axum"]);
    }

    #[test]
    fn test_detects_python_and_go() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("requirements.txt"), "Django==5.0\npytest\n").unwrap();
        std::fs::write(
            temp.path().join("go.mod"),
            "module example.com/app\n\nrequire github.com/gin-gonic/gin v1.9.0\n",
        )
        .unwrap();

        let frameworks = detect_frameworks(temp.path());
        assert_eq!(frameworks, vec!["Django", "Gin"]);
    }

    #[test]
    fn test_malformed_manifest_is_skipped() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), "{not json").unwrap();
        assert!(detect_frameworks(temp.path()).is_empty());
    }

    #[test]
    fn test_empty_repository() {
        let temp = TempDir::new().unwrap();
        assert!(detect_frameworks(temp.path()).is_empty());
    }
}
