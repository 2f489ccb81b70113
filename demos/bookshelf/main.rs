//! Bookshelf admin
//!
//! This example demonstrates:
//! - Two models, with books stored under their author
//! - List views with filters, sorting and extra columns
//! - A custom operation next to the standard delete
//! - A polymorphic model whose create view asks for the subclass first
//!
//! Run with `cargo run --example bookshelf`, then open
//! http://127.0.0.1:3000/admin/

use chrono::Utc;
use kibble::prelude::*;
use kibble::core::{LabelService, ValueType};
use kibble::views::ListColumn;

/// Marks a book as featured
struct FeatureRunner;

#[async_trait]
impl OperationRunner for FeatureRunner {
    async fn run(&self, store: &dyn Datastore, instance: &Entity) -> Result<OperationOutcome, OperationFailure> {
        if instance.get("featured").and_then(FieldValue::as_bool) == Some(true) {
            return Err(OperationFailure::new("already featured"));
        }
        let mut book = instance.clone();
        book.set("featured", true);
        store
            .put(book)
            .await
            .map_err(|e| OperationFailure::new(e.to_string()))?;
        Ok(OperationOutcome::Done)
    }
}

fn author_schema() -> ModelSchema {
    ModelSchema::new("Author")
        .property(PropertyDef::new("name", PropertyType::String).required())
        .property(PropertyDef::new("bio", PropertyType::Text))
        .property(PropertyDef::new("active", PropertyType::Boolean).default_value(true))
        .title_property("name")
}

fn book_schema() -> ModelSchema {
    let edition = ModelSchema::new("Edition")
        .property(PropertyDef::new("publisher", PropertyType::String))
        .property(PropertyDef::new("year", PropertyType::Integer));

    ModelSchema::new("Book")
        .property(PropertyDef::new("title", PropertyType::String).required())
        .property(
            PropertyDef::new("genre", PropertyType::String).choices(["fiction", "poetry", "essay"]),
        )
        .property(PropertyDef::new("rating", PropertyType::Integer))
        .property(PropertyDef::new("featured", PropertyType::Boolean))
        .property(PropertyDef::new("added", PropertyType::DateTime))
        .property(PropertyDef::new("tags", PropertyType::String).repeated())
        .property(PropertyDef::new("editions", PropertyType::Structured(Arc::new(edition))).repeated())
        .title_property("title")
}

fn book_views(author: Arc<ModelSchema>, book: Arc<ModelSchema>) -> Result<Vec<ViewDefinition>> {
    let list = ListOptions::default()
        .columns(vec![
            ListColumn::Label,
            ListColumn::property(&book, "genre")?,
            ListColumn::property(&book, "rating")?,
            ListColumn::property(&book, "featured")?,
        ])
        .filter(ChoicesFilter::from_property(&book, "genre")?)
        .filter(BoolFilter::new(&book, "featured")?)
        .filter(DateTimeFilter::new(&book, "added")?.none(true))
        .filter(
            EqualityFilter::new(&book, "rating", ValueType::Integer)?
                .with_title("Rating"),
        )
        .sortable(&book, "title")?
        .sortable(&book, "rating")?;

    let feature = OperationOptions::new(Arc::new(FeatureRunner), "featured")
        .fieldsets(vec![Fieldset::new("Book", ["title", "genre"])]);

    let form = FormViewOptions::default().help_text("Books belong to the author they are listed under.");
    Ok(vec![
        ViewDefinition::list(book.clone())
            .ancestors(vec![author.clone()])
            .with_list(list)
            .linked_actions(["create", "edit", "feature", "delete"]),
        ViewDefinition::create(book.clone())
            .ancestors(vec![author.clone()])
            .with_form(form.clone()),
        ViewDefinition::edit(book.clone())
            .ancestors(vec![author.clone()])
            .with_form(form)
            .linked_actions(["feature", "delete"]),
        ViewDefinition::operation(book.clone(), "feature", feature)
            .ancestors(vec![author.clone()])
            .button_icon("star"),
        ViewDefinition::delete(book).ancestors(vec![author]),
    ])
}

fn media_views() -> Vec<ViewDefinition> {
    let media = ModelSchema::polymodel("Media").property(PropertyDef::new("title", PropertyType::String).required());
    let podcast = media
        .subtype("Podcast")
        .property(PropertyDef::new("episodes", PropertyType::Integer));
    let film = media
        .subtype("Film")
        .property(PropertyDef::new("minutes", PropertyType::Integer));
    let labels = LabelService::default();
    let tags = TypeTagFilter::for_subtypes(&media, &[podcast.clone(), film.clone()], &labels);

    let media = Arc::new(media);
    let subtypes = vec![Arc::new(podcast), Arc::new(film)];
    let form = FormViewOptions::default().subtypes(subtypes);
    vec![
        ViewDefinition::list(media.clone())
            .with_list(ListOptions::default().filter(tags))
            .linked_actions(["create", "edit", "delete"]),
        ViewDefinition::create(media.clone()).with_form(form.clone()),
        ViewDefinition::edit(media.clone()).with_form(form),
        ViewDefinition::delete(media),
    ]
}

async fn seed(store: &InMemoryDatastore) -> Result<()> {
    let tolkien = store
        .put(Entity::new("Author").with("name", "J. R. R. Tolkien").with("active", false))
        .await?;
    let le_guin = store
        .put(Entity::new("Author").with("name", "Ursula K. Le Guin").with("active", false))
        .await?;

    for (author, title, genre, rating) in [
        (&tolkien, "The Hobbit", "fiction", 5),
        (&tolkien, "Tree and Leaf", "essay", 4),
        (&le_guin, "A Wizard of Earthsea", "fiction", 5),
        (&le_guin, "The Left Hand of Darkness", "fiction", 5),
        (&le_guin, "Wild Angels", "poetry", 3),
    ] {
        store
            .put(
                Entity::new("Book")
                    .with_parent(author.clone())
                    .with("title", title)
                    .with("genre", genre)
                    .with("rating", rating)
                    .with("featured", false)
                    .with("added", Utc::now()),
            )
            .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    kibble::init_tracing();

    let author = Arc::new(author_schema());
    let book = Arc::new(book_schema());

    let store = InMemoryDatastore::new();
    seed(&store).await?;

    let mut config = KibbleConfig::default();
    config.label = "Bookshelf".to_string();
    config.kind_groups = vec![KindGroup {
        name: "Library".to_string(),
        paths: vec!["Author".to_string(), "Author/Book".to_string()],
    }];

    println!("📚 Bookshelf admin");
    println!("==================\n");
    println!("   Authors: http://127.0.0.1:3000/admin/author/");
    println!("   Media:   http://127.0.0.1:3000/admin/media/\n");

    KibbleBuilder::new()
        .with_config(config)
        .with_datastore(store)
        .with_authenticator(NoAuthProvider)
        .register_views(standard_views(author.clone(), vec![]))
        .register_views(book_views(author, book)?)
        .register_views(media_views())
        .serve("127.0.0.1:3000")
        .await
}
