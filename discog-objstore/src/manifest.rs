use discog_types::{ContentHash, DumpVersion, EntityClass};

/// One of the four compressed XML files in a dump.
#[derive(Debug, Clone)]
pub struct FileDescriptor {
    pub entity_class: EntityClass,
    pub url: String,
    pub expected_sha256: ContentHash,
}

/// A monthly release of the upstream dataset.
#[derive(Debug, Clone)]
pub struct DumpManifest {
    pub version: DumpVersion,
    pub files: [FileDescriptor; 4],
}

impl DumpManifest {
    pub fn file_for(&self, class: EntityClass) -> &FileDescriptor {
        self.files
            .iter()
            .find(|f| f.entity_class == class)
            .expect("DumpManifest always carries exactly one descriptor per entity class")
    }

    pub fn file_name(version: DumpVersion, class: EntityClass) -> String {
        format!("discogs_{version}_{}s.xml.gz", class.as_str())
    }

    pub fn checksum_file_name(version: DumpVersion) -> String {
        format!("discogs_{version}_CHECKSUM.txt")
    }
}
