// PathManager maps upload ids and report keys to paths on disk.
//
// The path layout in the storage backend is roughly as follows:
//
//	<root>/reports
//	├── uploads
//	│   └── <id>
//	│       ├── data
//	│       └── data.<part>
//	└── blobs
//	    └── <first two chars of key>
//	        └── <key>
//	            └── data
//
// Upload targets live under `uploads` until they are committed, then the
// data file is renamed into `blobs`. Each write lands in its own `data.<part>`
// file and replaces `data` only once the whole body arrived. Report metadata is kept in the database,
// never next to the data.

#[derive(Clone, Debug)]
pub struct PathManager {
    root_path: String,
}

impl PathManager {
    pub fn new(root: &str) -> Self {
        PathManager {
            root_path: root.trim_end_matches('/').to_string(),
        }
    }

    /// Returns the path to the root of the report storage,
    /// (e.g. `<root>/reports`).
    pub fn reports_path(&self) -> String {
        format!("{}/reports", self.root_path)
    }

    /// Returns the path to the root of uploads,
    /// (e.g. `<root>/reports/uploads`).
    pub fn uploads_path(&self) -> String {
        format!("{}/uploads", self.reports_path())
    }

    /// Returns the path to a single upload target,
    /// (e.g. `<root>/reports/uploads/<id>`).
    pub fn upload_path(&self, id: &str) -> String {
        format!("{}/{}", self.uploads_path(), id)
    }

    /// Returns the path to the data of a single upload target,
    /// (e.g. `<root>/reports/uploads/<id>/data`).
    pub fn upload_data_path(&self, id: &str) -> String {
        format!("{}/data", self.upload_path(id))
    }

    /// Returns the path to an in-flight write of an upload target,
    /// (e.g. `<root>/reports/uploads/<id>/data.<part>`).
    pub fn upload_part_path(&self, id: &str, part: &str) -> String {
        format!("{}.{}", self.upload_data_path(id), part)
    }

    /// Returns the path to the root of the stored blobs,
    /// (e.g. `<root>/reports/blobs`).
    pub fn blobs_path(&self) -> String {
        format!("{}/blobs", self.reports_path())
    }

    /// Returns the path to a single blob,
    /// (e.g. `<root>/reports/blobs/<first two chars of key>/<key>`).
    pub fn blob_path(&self, key: &str) -> String {
        let prefix = key.get(..2).unwrap_or(key);
        format!("{}/{}/{}", self.blobs_path(), prefix, key)
    }

    /// Returns the path to the data of a single blob,
    /// (e.g. `<root>/reports/blobs/<first two chars of key>/<key>/data`).
    pub fn blob_data_path(&self, key: &str) -> String {
        format!("{}/data", self.blob_path(key))
    }
}
