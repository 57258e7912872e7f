use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Live similar documents view for a vault.
    ///
    /// Reads commands from stdin: open PATH, close, refresh, enter N,
    /// leave N, panel N, gradient START END, quit.
    Watch {
        /// Vault directory
        vault: PathBuf,

        /// Document to open on start
        #[clap(short, long)]
        open: Option<PathBuf>,
    },

    /// Print the documents similar to one document
    Similar {
        path: PathBuf,

        /// Vault root, defaults to the document's directory
        #[clap(long)]
        vault: Option<PathBuf>,
    },

    /// Contextual search across indexed documents
    Search {
        query: String,

        #[clap(short, long, default_value = "10")]
        limit: usize,

        /// Use the enhanced (slower) search endpoint
        #[clap(short, long, default_value = "false")]
        enhanced: bool,

        /// Ask the server for a query-focused blurb per hit
        #[clap(short, long, default_value = "false")]
        blurbs: bool,
    },

    /// Assign ids to documents and send them to the index
    Index {
        /// Documents to index
        #[clap(conflicts_with = "all")]
        paths: Vec<PathBuf>,

        /// Index every markdown document in this vault
        #[clap(long, value_name = "VAULT")]
        all: Option<PathBuf>,

        /// Vault root for PATHS, defaults to each document's directory
        #[clap(long)]
        vault: Option<PathBuf>,
    },

    /// List or remove documents held by the server's index
    Indexed {
        /// Only show documents whose title contains this text
        #[clap(short, long)]
        filter: Option<String>,

        /// Remove documents from the index by id
        #[clap(long, value_name = "ID", num_args = 1..)]
        delete: Vec<String>,

        /// Don't ask before deleting
        #[clap(short, long, requires = "delete")]
        yes: bool,
    },

    /// Chat with the assistant
    Chat {
        /// Scope the conversation to this document
        #[clap(short, long)]
        document: Option<PathBuf>,

        #[clap(long)]
        vault: Option<PathBuf>,
    },

    /// Stream a summary of a document
    Summarize {
        path: PathBuf,

        #[clap(long)]
        vault: Option<PathBuf>,
    },

    /// Set the score gradient, e.g. `gradient '#009FFF' '#ec2F4B'`
    /// or `gradient --preset wiretap`
    Gradient {
        #[clap(required_unless_present = "preset", requires = "end")]
        start: Option<String>,
        end: Option<String>,

        /// One of: By Design, Pacific Dream, Purpink, Wiretap, Sublime Light, Shifter
        #[clap(short, long, conflicts_with_all = ["start", "end"])]
        preset: Option<String>,

        #[clap(short, long)]
        name: Option<String>,
    },
}
