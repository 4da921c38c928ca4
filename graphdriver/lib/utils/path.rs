//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The sub directory of a layer entry that holds the layer content.
pub const LAYER_DIFF_SUBDIR: &str = "diff";

/// The file in a layer entry that records the layer's identity and linkage.
pub const LAYER_METADATA_FILENAME: &str = "layer.json";

/// The default root under which drivers keep their layers.
pub const DEFAULT_GRAPH_ROOT: &str = "/var/lib/graphdriver";

/// The prefix of a whiteout entry in a diff stream.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// The name of the entry that marks a directory as opaque in a diff stream.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// The prefix of whiteout entries reserved for the format itself.
pub const WHITEOUT_META_PREFIX: &str = ".wh..wh.";
