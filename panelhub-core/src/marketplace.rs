//! Plugin marketplace search
//!
//! Query-and-map against three public plugin catalogs: Hangar
//! (PaperMC), Modrinth and Spiget (SpigotMC). Each catalog has its own
//! response shape; results are flattened into one [`PluginHit`] list.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarketplaceError {
    #[error("catalog request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected catalog response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("unknown plugin source: {0}")]
    UnknownCatalog(String),

    #[error("no download available for {0}")]
    NoDownload(String),
}

/// Supported plugin catalogs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    Hangar,
    Modrinth,
    Spigot,
}

impl Catalog {
    pub fn parse(s: &str) -> Result<Self, MarketplaceError> {
        match s {
            "hangar" => Ok(Catalog::Hangar),
            "modrinth" => Ok(Catalog::Modrinth),
            "spigot" => Ok(Catalog::Spigot),
            other => Err(MarketplaceError::UnknownCatalog(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Catalog::Hangar => "hangar",
            Catalog::Modrinth => "modrinth",
            Catalog::Spigot => "spigot",
        }
    }
}

/// One search result, normalized across catalogs
#[derive(Debug, Clone, Serialize)]
pub struct PluginHit {
    pub name: String,
    pub description: String,
    pub downloads: u64,
    pub source: &'static str,
    pub slug: String,
    pub icon_url: String,
}

/// Search a catalog for plugins matching `query` on a game version.
pub async fn search(
    http: &Client,
    catalog: Catalog,
    query: &str,
    game_version: &str,
) -> Result<Vec<PluginHit>, MarketplaceError> {
    match catalog {
        Catalog::Hangar => {
            let url = format!(
                "https://hangar.papermc.io/api/v1/projects?q={}&limit=20&platform=PAPER&version={}",
                urlencode(query),
                game_version
            );
            let body = http.get(&url).send().await?.bytes().await?;
            Ok(map_hangar(&body)?)
        }
        Catalog::Modrinth => {
            let facets = format!(r#"[["project_type:plugin"],["versions:{game_version}"]]"#);
            let url = format!(
                "https://api.modrinth.com/v2/search?query={}&facets={}&limit=20",
                urlencode(query),
                urlencode(&facets)
            );
            let body = http.get(&url).send().await?.bytes().await?;
            Ok(map_modrinth(&body)?)
        }
        Catalog::Spigot => {
            let url = format!(
                "https://api.spiget.org/v2/search/resources/{}?size=20",
                urlencode(query)
            );
            let body = http.get(&url).send().await?.bytes().await?;
            Ok(map_spigot(&body)?)
        }
    }
}

/// Resolve the direct download URL for a plugin.
///
/// Hangar and Spiget have stable download URL formats; Modrinth needs a
/// version lookup first.
pub async fn download_url(
    http: &Client,
    catalog: Catalog,
    slug: &str,
    version: &str,
) -> Result<String, MarketplaceError> {
    match catalog {
        Catalog::Hangar => Ok(format!(
            "https://hangar.papermc.io/api/v1/projects/{slug}/versions/{version}/PAPER/download"
        )),
        Catalog::Spigot => Ok(format!(
            "https://api.spiget.org/v2/resources/{slug}/download"
        )),
        Catalog::Modrinth => {
            #[derive(Deserialize)]
            struct VersionEntry {
                files: Vec<VersionFile>,
            }
            #[derive(Deserialize)]
            struct VersionFile {
                url: String,
            }

            let url = format!("https://api.modrinth.com/v2/project/{slug}/version");
            let versions: Vec<VersionEntry> = http.get(&url).send().await?.json().await?;
            versions
                .into_iter()
                .flat_map(|v| v.files)
                .next()
                .map(|f| f.url)
                .ok_or_else(|| MarketplaceError::NoDownload(slug.to_string()))
        }
    }
}

fn map_hangar(body: &[u8]) -> Result<Vec<PluginHit>, serde_json::Error> {
    #[derive(Deserialize)]
    struct HangarSearch {
        result: Vec<HangarProject>,
    }
    #[derive(Deserialize)]
    struct HangarProject {
        name: String,
        #[serde(default)]
        description: String,
        stats: HangarStats,
        namespace: HangarNamespace,
        #[serde(rename = "avatarUrl", default)]
        avatar_url: String,
    }
    #[derive(Deserialize)]
    struct HangarStats {
        downloads: u64,
    }
    #[derive(Deserialize)]
    struct HangarNamespace {
        slug: String,
    }

    let data: HangarSearch = serde_json::from_slice(body)?;
    Ok(data
        .result
        .into_iter()
        .map(|p| PluginHit {
            name: p.name,
            description: p.description,
            downloads: p.stats.downloads,
            source: "hangar",
            slug: p.namespace.slug,
            icon_url: p.avatar_url,
        })
        .collect())
}

fn map_modrinth(body: &[u8]) -> Result<Vec<PluginHit>, serde_json::Error> {
    #[derive(Deserialize)]
    struct ModrinthSearch {
        hits: Vec<ModrinthHit>,
    }
    #[derive(Deserialize)]
    struct ModrinthHit {
        title: String,
        #[serde(default)]
        description: String,
        downloads: u64,
        slug: String,
        #[serde(default)]
        icon_url: String,
    }

    let data: ModrinthSearch = serde_json::from_slice(body)?;
    Ok(data
        .hits
        .into_iter()
        .map(|p| PluginHit {
            name: p.title,
            description: p.description,
            downloads: p.downloads,
            source: "modrinth",
            slug: p.slug,
            icon_url: p.icon_url,
        })
        .collect())
}

fn map_spigot(body: &[u8]) -> Result<Vec<PluginHit>, serde_json::Error> {
    #[derive(Deserialize)]
    struct SpigotResource {
        name: String,
        #[serde(default)]
        tag: String,
        id: u64,
        #[serde(default)]
        icon: SpigotIcon,
        #[serde(default)]
        downloads: u64,
    }
    #[derive(Deserialize, Default)]
    struct SpigotIcon {
        #[serde(default)]
        url: String,
    }

    let data: Vec<SpigotResource> = serde_json::from_slice(body)?;
    Ok(data
        .into_iter()
        .map(|p| PluginHit {
            name: p.name,
            description: p.tag,
            downloads: p.downloads,
            source: "spigot",
            slug: p.id.to_string(),
            icon_url: format!("https://www.spigotmc.org/{}", p.icon.url),
        })
        .collect())
}

/// Minimal percent-encoding for query-string values.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            b' ' => out.push_str("%20"),
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_parse() {
        assert_eq!(Catalog::parse("hangar").unwrap(), Catalog::Hangar);
        assert_eq!(Catalog::parse("modrinth").unwrap(), Catalog::Modrinth);
        assert_eq!(Catalog::parse("spigot").unwrap(), Catalog::Spigot);
        assert!(matches!(
            Catalog::parse("curseforge"),
            Err(MarketplaceError::UnknownCatalog(_))
        ));
    }

    #[test]
    fn test_map_hangar() {
        let body = br#"{"result":[{
            "name":"WorldEdit",
            "description":"In-game map editor",
            "stats":{"downloads":120000},
            "namespace":{"slug":"worldedit"},
            "avatarUrl":"https://hangar.papermc.io/avatar.png"
        }]}"#;

        let hits = map_hangar(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "WorldEdit");
        assert_eq!(hits[0].slug, "worldedit");
        assert_eq!(hits[0].downloads, 120000);
        assert_eq!(hits[0].source, "hangar");
    }

    #[test]
    fn test_map_modrinth() {
        let body = br#"{"hits":[{
            "title":"Chunky",
            "description":"Pre-generates chunks",
            "downloads":500,
            "slug":"chunky",
            "icon_url":"https://cdn.modrinth.com/icon.png"
        }]}"#;

        let hits = map_modrinth(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Chunky");
        assert_eq!(hits[0].source, "modrinth");
    }

    #[test]
    fn test_map_spigot() {
        let body = br#"[{
            "name":"EssentialsX",
            "tag":"The essential plugin suite",
            "id":9089,
            "icon":{"url":"data/resource_icons/9/9089.jpg"},
            "downloads":4000000
        }]"#;

        let hits = map_spigot(body).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].slug, "9089");
        assert!(hits[0].icon_url.starts_with("https://www.spigotmc.org/"));
    }

    #[test]
    fn test_map_rejects_garbage() {
        assert!(map_hangar(b"not json").is_err());
        assert!(map_modrinth(b"{}").is_err());
    }

    #[test]
    fn test_urlencode() {
        assert_eq!(urlencode("world edit"), "world%20edit");
        assert_eq!(urlencode("a+b&c"), "a%2Bb%26c");
        assert_eq!(urlencode("plain-name_1.0~x"), "plain-name_1.0~x");
    }
}
