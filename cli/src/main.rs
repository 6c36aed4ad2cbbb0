use clap::{Parser, Subcommand, ValueEnum};
use env_logger::{Builder, Env};
use ghcrctl::{
    api::PackageApi,
    attestation,
    config::{Config, Credentials, OwnerKind},
    graph::{DeletionPlan, Graph, GraphBuilder, Node, Scope},
    image::ImageVersion,
    present::{self, JsonPresenter, Presenter, TablePresenter, TreePresenter},
    registry::{PackageClient, RegistryClient},
    tagger::{self, TagOutcome},
    GraphError, ImageName, Role, Tag,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::{io::Write, path::PathBuf, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Graph-aware administration of GitHub Container Registry packages
#[derive(Debug, Parser)]
#[clap(name = "ghcrctl", version)]
struct App {
    /// Log filter, such as warn, info, debug, or ghcrctl=trace
    #[clap(short, long, default_value = "warn")]
    log_level: String,

    /// Configuration file to use instead of the default location
    #[clap(long)]
    config: Option<PathBuf>,

    /// Registry requests in flight at once during discovery
    #[clap(long)]
    fan_out: Option<usize>,

    /// Print tables without borders
    #[clap(long)]
    plain: bool,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show or change stored settings
    #[clap(subcommand)]
    Config(ConfigCommand),
    /// List container packages owned by an account
    Packages {
        /// Account to list, defaults to the configured owner
        owner: Option<String>,
    },
    /// List the images in a package, one row per root
    Images {
        /// Package reference, like owner/name
        image: String,
    },
    /// List every version of a package with its classification
    Versions {
        /// Package reference, like owner/name
        image: String,
    },
    /// Draw the images containing a tag or digest
    Graph {
        /// Image reference, like owner/name:tag or owner/name@sha256:...
        reference: String,
        /// Draw every image in the package
        #[clap(long)]
        all: bool,
        /// Print JSON records instead of a tree
        #[clap(long)]
        json: bool,
    },
    /// Print the SBOM documents attached to an image
    Sbom {
        reference: String,
    },
    /// Print the provenance documents attached to an image
    Provenance {
        reference: String,
    },
    /// Point a new tag at an existing manifest
    Tag {
        /// Package reference, like owner/name
        image: String,
        /// Digest or existing tag to point at
        target: String,
        /// Tag to create
        new_tag: String,
        /// Move the tag if it already points elsewhere
        #[clap(long)]
        force: bool,
    },
    /// Delete an image along with everything only it uses
    Delete {
        /// Image reference, like owner/name:tag or owner/name@sha256:...
        reference: String,
        /// Root digest to delete, overriding the reference's version
        #[clap(long)]
        digest: Option<String>,
        /// Show the plan without deleting anything
        #[clap(long)]
        dry_run: bool,
    },
    /// Delete one package version by ID, ignoring the graph
    DeleteVersion {
        /// Package reference, like owner/name
        image: String,
        id: i64,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the configuration file
    Show,
    /// Remember the default owner and whether it is a user or organization
    SetOwner {
        name: String,
        #[clap(long = "type", value_enum)]
        kind: KindArg,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    User,
    Org,
}

impl From<KindArg> for OwnerKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::User => OwnerKind::User,
            KindArg::Org => OwnerKind::Org,
        }
    }
}

#[tokio::main]
async fn main() {
    let app = match App::try_parse() {
        Ok(app) => app,
        Err(err) => {
            let _ = err.print();
            std::process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };
    Builder::from_env(Env::default().default_filter_or(&app.log_level)).init();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, stopping");
                cancel.cancel();
            }
        }
    });

    if let Err(err) = run(app, cancel).await {
        if let GraphError::Cancelled(Some(graph)) = &err {
            eprintln!("cancelled after discovering {} manifests", graph.len());
        }
        eprintln!("error: {}", err);
        std::process::exit(err.exit_code());
    }
}

struct Context {
    config: Config,
    config_path: PathBuf,
    fan_out: usize,
    plain: bool,
    cancel: CancellationToken,
}

async fn run(app: App, cancel: CancellationToken) -> Result<(), GraphError> {
    let config_path = match app.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load(&config_path)?;
    let ctx = Context {
        fan_out: app.fan_out.unwrap_or_else(|| config.fan_out()).max(1),
        config,
        config_path,
        plain: app.plain,
        cancel,
    };

    match app.cmd {
        Command::Config(cmd) => ctx.config_cmd(cmd),
        Command::Packages { owner } => ctx.packages(owner).await,
        Command::Images { image } => ctx.images(&image).await,
        Command::Versions { image } => ctx.versions(&image).await,
        Command::Graph {
            reference,
            all,
            json,
        } => ctx.graph(&reference, all, json).await,
        Command::Sbom { reference } => ctx.attestations(&reference, Role::Sbom).await,
        Command::Provenance { reference } => {
            ctx.attestations(&reference, Role::Provenance).await
        }
        Command::Tag {
            image,
            target,
            new_tag,
            force,
        } => ctx.tag(&image, &target, &new_tag, force).await,
        Command::Delete {
            reference,
            digest,
            dry_run,
        } => ctx.delete(&reference, digest.as_deref(), dry_run).await,
        Command::DeleteVersion { image, id } => ctx.delete_version(&image, id).await,
    }
}

impl Context {
    fn credentials(&self) -> Result<Credentials, GraphError> {
        Credentials::from_env()
    }

    fn package_client(&self, credentials: &Credentials) -> Result<PackageClient, GraphError> {
        let mut builder = PackageClient::builder(credentials.clone());
        if let Some(owner) = &self.config.owner {
            builder = builder.owner(&owner.name, owner.kind);
        }
        builder.build()
    }

    fn clients(&self, image: &ImageName) -> Result<(Arc<PackageClient>, Arc<RegistryClient>), GraphError> {
        let credentials = self.credentials()?;
        let packages = self.package_client(&credentials)?;
        let registry = match image.registry() {
            Some(registry) => registry.clone(),
            None => self.config.registry()?,
        };
        let client = RegistryClient::builder()
            .registry(registry.clone())
            .login(
                registry,
                image.owner().to_owned(),
                Some(credentials.token().to_owned()),
            )
            .build()?;
        Ok((Arc::new(packages), Arc::new(client)))
    }

    async fn build_graph(
        &self,
        packages: Arc<PackageClient>,
        registry: Arc<RegistryClient>,
        image: &ImageName,
        scope: &Scope,
    ) -> Result<Graph, GraphError> {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("discovering {}", image.without_version()));
        spinner.enable_steady_tick(Duration::from_millis(120));

        let result = GraphBuilder::new(packages, registry)
            .fan_out(self.fan_out)
            .cancel_token(self.cancel.clone())
            .build(&image.without_version(), scope)
            .await;
        spinner.finish_and_clear();
        result
    }

    fn config_cmd(&self, cmd: ConfigCommand) -> Result<(), GraphError> {
        match cmd {
            ConfigCommand::Show => {
                println!("# {}", self.config_path.display());
                print!("{}", self.config.to_toml_string()?);
                Ok(())
            }
            ConfigCommand::SetOwner { name, kind } => {
                let mut config = self.config.clone();
                config.set_owner(&name, kind.into());
                config.save(&self.config_path)?;
                println!("owner set to {} ({})", name, OwnerKind::from(kind));
                Ok(())
            }
        }
    }

    async fn packages(&self, owner: Option<String>) -> Result<(), GraphError> {
        let owner = match owner.or_else(|| self.config.owner.as_ref().map(|o| o.name.clone())) {
            Some(owner) => owner,
            None => {
                return Err(GraphError::Config(
                    "no owner given and none configured, try config set-owner".to_owned(),
                ))
            }
        };
        let client = self.package_client(&self.credentials()?)?;
        let mut packages = Vec::new();
        let mut page = Some(1);
        while let Some(number) = page {
            let result = client.list_packages(&owner, number).await?;
            packages.extend(result.packages);
            page = result.next_page;
        }
        println!("{}", present::packages_table(&packages, self.plain));
        Ok(())
    }

    async fn images(&self, reference: &str) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let (packages, registry) = self.clients(&image)?;
        let graph = self.build_graph(packages, registry, &image, &Scope::Full).await?;
        println!("{}", present::images_table(&graph, self.plain));
        Ok(())
    }

    async fn versions(&self, reference: &str) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let (packages, registry) = self.clients(&image)?;
        let graph = self.build_graph(packages, registry, &image, &Scope::Full).await?;
        TablePresenter { raw: self.plain }.render(&graph, None, &mut std::io::stdout())
    }

    async fn graph(&self, reference: &str, all: bool, json: bool) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let (packages, registry) = self.clients(&image)?;
        // sharing is only visible against the whole package
        let graph = self.build_graph(packages, registry, &image, &Scope::Full).await?;

        let presenter: Box<dyn Presenter> = if json {
            Box::new(JsonPresenter { pretty: true })
        } else {
            Box::new(TreePresenter)
        };
        let mut out = std::io::stdout();
        if all {
            return presenter.render(&graph, None, &mut out);
        }
        let node = find_node(&graph, &image, &image.version_or_latest())?;
        let roots = graph.image_of(node.digest());
        for root in &roots {
            presenter.render(&graph, Some(root), &mut out)?;
        }
        out.flush()?;
        Ok(())
    }

    async fn attestations(&self, reference: &str, role: Role) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let (packages, registry) = self.clients(&image)?;
        let scope = Scope::from(image.version_or_latest());
        let graph = self
            .build_graph(packages, registry.clone(), &image, &scope)
            .await?;
        for body in attestation::fetch_bodies(registry.as_ref(), &image, &graph, role).await? {
            println!("# {} layer {} ({})", body.manifest, body.layer, body.media_type);
            println!("{}", serde_json::to_string_pretty(&body.content)?);
        }
        Ok(())
    }

    async fn tag(
        &self,
        reference: &str,
        target: &str,
        new_tag: &str,
        force: bool,
    ) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let new_tag = Tag::parse(new_tag)?;
        let (_, registry) = self.clients(&image)?;
        let digest = tagger::resolve_target(registry.as_ref(), &image, target).await?;
        match tagger::add_tag(registry.as_ref(), &image, &digest, &new_tag, force).await? {
            TagOutcome::Created => println!("tagged {} as {}", digest, new_tag),
            TagOutcome::Unchanged => println!("{} already points at {}", new_tag, digest),
            TagOutcome::Moved { from } => {
                println!("moved {} from {} to {}", new_tag, from, digest)
            }
        }
        Ok(())
    }

    async fn delete(
        &self,
        reference: &str,
        digest: Option<&str>,
        dry_run: bool,
    ) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let version = match digest {
            Some(digest) => ImageVersion::parse(digest)?,
            None => image.version().ok_or_else(|| {
                GraphError::InvalidReference(format!(
                    "{}: delete needs a tag or digest",
                    reference
                ))
            })?,
        };
        let (packages, registry) = self.clients(&image)?;
        let graph = self
            .build_graph(packages.clone(), registry, &image, &Scope::Full)
            .await?;

        let node = find_node(&graph, &image, &version)?;
        if !graph.is_root(node.digest()) {
            let images: Vec<String> = graph.image_of(node.digest()).into_iter().collect();
            return Err(GraphError::InvalidReference(format!(
                "{} is part of image {}, delete that instead",
                node.digest(),
                images.join(", ")
            )));
        }

        let plan = DeletionPlan::for_root(&graph, node.digest());
        println!("{}", present::plan_table(&plan, self.plain));
        if dry_run {
            println!("dry run, nothing deleted");
            return Ok(());
        }
        let report = plan
            .execute(packages.as_ref(), &image.without_version(), &self.cancel)
            .await;
        println!("{}", present::report_table(&report, self.plain));
        report.result()
    }

    async fn delete_version(&self, reference: &str, id: i64) -> Result<(), GraphError> {
        let image = ImageName::parse(reference)?;
        let client = self.package_client(&self.credentials()?)?;
        client.delete_version(&image.without_version(), id).await?;
        println!("deleted version {}", id);
        Ok(())
    }
}

fn find_node<'a>(
    graph: &'a Graph,
    image: &ImageName,
    version: &ImageVersion,
) -> Result<&'a Node, GraphError> {
    let node = match version {
        ImageVersion::Tag(tag) => graph.by_tag(tag.as_str()),
        ImageVersion::ContentDigest(digest) => graph.get(digest.as_str()),
    };
    node.ok_or_else(|| {
        GraphError::NotFound(format!("{} in {}", version, image.without_version()))
    })
}
