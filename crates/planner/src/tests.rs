use super::*;
use chrono::{DateTime, TimeZone, Utc};
use filter::{SpatialOp, TemporalOp, TimeOperand};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn date(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, 0, 0, 0).unwrap()
}

/// Schema used by most scenarios: one unindexed attribute, one indexed with
/// no cardinality hint, and an indexed high/low pair.
fn sample_schema() -> Schema {
    Schema::parse(
        "observations",
        "attr1:String,attr2:String:index=true,\
         high:String:index=true:cardinality=high,\
         low:String:index=true:cardinality=low,\
         geom:Point:srid=4326:default=true,dtg:Date:default=true",
    )
    .unwrap()
}

fn schema_with(spec: &str) -> Schema {
    Schema::parse("observations", spec).unwrap()
}

fn text_eq(property: &str, value: &str) -> Filter {
    Filter::eq(property, AttrValue::Text(value.into()))
}

fn during(property: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Filter {
    Filter::Temporal {
        op: TemporalOp::During,
        property: property.into(),
        time: TimeOperand::Range(Interval::new(start, end)),
    }
}

fn plan(schema: &Schema, f: Filter) -> QueryPlan {
    QueryPlanner::new(schema).plan(f, &QueryHints::default()).unwrap()
}

fn stage<'a>(p: &'a QueryPlan, priority: u16) -> &'a IteratorStage {
    p.iterators
        .iter()
        .find(|s| s.priority == priority)
        .unwrap_or_else(|| panic!("no stage in band {priority}"))
}

// Scenario 1: equality on an indexed attribute with no space-time.
#[test]
fn indexed_equality_uses_the_attribute_index() {
    let schema = sample_schema();
    let p = plan(&schema, text_eq("attr2", "val56"));

    assert_eq!(p.strategy, StrategyTag::AttrEq);
    assert_eq!(p.ranges.len(), 1);
    assert_eq!(p.ranges[0].start.as_ref(), b"attr2\x00val56");
    assert_eq!(p.ranges[0].end.as_ref(), b"attr2\x00val57");

    let index_stage = stage(&p, BAND_COARSE_INDEX);
    assert_eq!(index_stage.class_name, iters::ATTR_INDEX);
    assert_eq!(index_stage.options[opts::ATTR_NAME], "attr2");
    assert_eq!(stage(&p, BAND_FINE_FILTER).class_name, iters::FINE_FILTER);
}

// Scenario 2: the same equality on an unindexed attribute falls through.
#[test]
fn unindexed_equality_falls_back_to_the_space_time_index() {
    let schema = sample_schema();
    let p = plan(&schema, text_eq("attr1", "val56"));
    assert_eq!(p.strategy, StrategyTag::StIdx);
}

// Scenario 3: prefix pattern on an indexed string attribute.
#[test]
fn prefix_pattern_plans_a_byte_window() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::Like {
            property: "attr2".into(),
            pattern: "2nd1%".into(),
            case_insensitive: true,
        },
    );

    assert_eq!(p.strategy, StrategyTag::AttrLike);
    assert_eq!(p.ranges.len(), 1);
    assert_eq!(p.ranges[0].start.as_ref(), b"attr2\x002nd1");
    assert_eq!(p.ranges[0].end.as_ref(), b"attr2\x002nd2");
}

// Scenario 4: the same pattern on an unindexed attribute falls through.
#[test]
fn prefix_pattern_on_unindexed_attribute_falls_back() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::Like {
            property: "attr1".into(),
            pattern: "2nd1%".into(),
            case_insensitive: true,
        },
    );
    assert_eq!(p.strategy, StrategyTag::StIdx);
}

#[test]
fn non_prefix_patterns_never_reach_the_like_compiler() {
    let schema = sample_schema();
    for pattern in ["%2nd1", "2n%d1%", "2nd_%", "2nd1", "%"] {
        let p = plan(
            &schema,
            Filter::Like {
                property: "attr2".into(),
                pattern: pattern.into(),
                case_insensitive: false,
            },
        );
        assert_eq!(p.strategy, StrategyTag::StIdx, "pattern {pattern:?}");
    }
}

// Scenario 5: BETWEEN expands to a closed range.
#[test]
fn between_plans_a_closed_range() {
    let schema = schema_with("attr2:Int:index=true,geom:Point:default=true,dtg:Date:default=true");
    let p = plan(
        &schema,
        Filter::Between {
            property: "attr2".into(),
            lo: AttrValue::Int(10),
            hi: AttrValue::Int(20),
        },
    );

    assert_eq!(p.strategy, StrategyTag::AttrRange);
    let mut start = b"attr2\x00".to_vec();
    start.extend(AttrValue::Int(10).to_sortable_bytes());
    let mut end = b"attr2\x00".to_vec();
    end.extend(AttrValue::Int(20).to_sortable_bytes());
    end.push(0x00);
    assert_eq!(p.ranges, vec![ByteRange::new(start, end)]);
}

// Scenario 6: conjoined comparisons intersect into one closed-open range.
#[test]
fn conjoined_comparisons_intersect() {
    let schema = schema_with("attr2:Int:index=true,geom:Point:default=true,dtg:Date:default=true");
    let p = plan(
        &schema,
        Filter::And(vec![
            Filter::Compare {
                op: CompareOp::GtEq,
                property: "attr2".into(),
                value: AttrValue::Int(11),
            },
            Filter::Compare {
                op: CompareOp::Lt,
                property: "attr2".into(),
                value: AttrValue::Int(20),
            },
        ]),
    );

    assert_eq!(p.strategy, StrategyTag::AttrRange);
    let mut start = b"attr2\x00".to_vec();
    start.extend(AttrValue::Int(11).to_sortable_bytes());
    let mut end = b"attr2\x00".to_vec();
    end.extend(AttrValue::Int(20).to_sortable_bytes());
    assert_eq!(p.ranges, vec![ByteRange::new(start, end)]);
}

#[test]
fn contradictory_comparisons_compile_to_the_empty_plan() {
    let schema = schema_with("attr2:Int:index=true,geom:Point:default=true,dtg:Date:default=true");
    let p = plan(
        &schema,
        Filter::And(vec![
            Filter::Compare {
                op: CompareOp::Gt,
                property: "attr2".into(),
                value: AttrValue::Int(20),
            },
            Filter::Compare {
                op: CompareOp::Lt,
                property: "attr2".into(),
                value: AttrValue::Int(10),
            },
        ]),
    );
    assert!(p.is_empty());
    assert!(p.iterators.is_empty());
}

// Scenario 7: id predicates dominate every other conjunct.
#[test]
fn id_predicates_dominate() {
    let schema = sample_schema();
    let polygon = filter::rect_polygon(45.0, 23.0, 48.0, 27.0);
    let p = plan(
        &schema,
        Filter::And(vec![
            Filter::id_in(["val56"]),
            Filter::Spatial {
                op: SpatialOp::Intersects,
                property: "geom".into(),
                geometry: polygon,
            },
        ]),
    );

    assert_eq!(p.strategy, StrategyTag::RecordId);
    assert_eq!(p.ranges, vec![ByteRange::single_row(b"val56")]);
    let fine = stage(&p, BAND_FINE_FILTER);
    assert!(fine.options[opts::ECQL_FILTER].contains("INTERSECTS(geom"));
}

#[test]
fn multiple_id_sets_union() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::And(vec![
            Filter::id_in(["f2", "f1"]),
            Filter::id_in(["f3", "f2"]),
        ]),
    );
    assert_eq!(
        p.ranges,
        vec![
            ByteRange::single_row(b"f1"),
            ByteRange::single_row(b"f2"),
            ByteRange::single_row(b"f3"),
        ]
    );
}

// Scenario 8: high-cardinality equality beats the space-time index, under
// every conjunct order.
#[test]
fn high_cardinality_equality_takes_precedence() {
    let schema = sample_schema();
    let conjuncts = vec![
        Filter::bbox("geom", -10.0, -10.0, 10.0, 10.0),
        text_eq("high", "x"),
        text_eq("low", "y"),
    ];

    for i in 0..3 {
        for j in 0..3 {
            if i == j {
                continue;
            }
            let k = 3 - i - j;
            let ordered = vec![
                conjuncts[i].clone(),
                conjuncts[j].clone(),
                conjuncts[k].clone(),
            ];
            let p = plan(&schema, Filter::And(ordered));
            assert_eq!(p.strategy, StrategyTag::AttrEq);
            assert!(p.ranges[0].start.as_ref().starts_with(b"high\x00"));
        }
    }
}

// Scenario 9: a low-cardinality attribute defers to the space-time index.
#[test]
fn low_cardinality_defers_to_the_space_time_index() {
    let schema = sample_schema();
    let bbox = Filter::bbox("geom", -10.0, -10.0, 10.0, 10.0);
    let low = text_eq("low", "y");

    for ordered in [
        vec![bbox.clone(), low.clone()],
        vec![low, bbox],
    ] {
        let p = plan(&schema, Filter::And(ordered));
        assert_eq!(p.strategy, StrategyTag::StIdx);
    }
}

// Scenario 10: a temporal operator on an indexed non-default date attribute
// is an attribute range.
#[test]
fn temporal_range_on_indexed_attribute() {
    let schema = schema_with("attr2:Date:index=true,geom:Point:default=true,dtg:Date:default=true");
    let p = plan(
        &schema,
        during(
            "attr2",
            Utc.with_ymd_and_hms(2012, 1, 1, 11, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2014, 1, 1, 12, 15, 0).unwrap(),
        ),
    );

    assert_eq!(p.strategy, StrategyTag::AttrRange);
    let mut start = b"attr2\x00".to_vec();
    start.extend(
        AttrValue::Date(Utc.with_ymd_and_hms(2012, 1, 1, 11, 0, 0).unwrap()).to_sortable_bytes(),
    );
    assert_eq!(p.ranges[0].start.as_ref(), &start[..]);
}

#[test]
fn legacy_versions_always_use_the_space_time_index() {
    let schema = sample_schema();
    for f in [
        text_eq("attr2", "val56"),
        text_eq("high", "x"),
        Filter::id_in(["f1"]),
    ] {
        let tag = choose_strategy(&schema, &f, &QueryHints::default(), 0);
        assert_eq!(tag, StrategyTag::StIdx);
        let tag = choose_strategy(&schema, &f, &QueryHints::default(), -1);
        assert_eq!(tag, StrategyTag::StIdx);
    }

    // The same bypass applies when compiling a full plan.
    let p = QueryPlanner::new(&schema)
        .with_version(0)
        .plan(text_eq("attr2", "val56"), &QueryHints::default())
        .unwrap();
    assert_eq!(p.strategy, StrategyTag::StIdx);
}

#[test]
fn empty_temporal_intersection_short_circuits() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::And(vec![
            during("dtg", date(2012, 1, 1), date(2013, 1, 1)),
            during("dtg", date(2014, 1, 1), date(2015, 1, 1)),
        ]),
    );
    assert!(p.is_empty());
    assert!(p.iterators.is_empty());
}

#[test]
fn explicit_exclude_short_circuits() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::And(vec![Filter::ExcludeAll, text_eq("attr2", "val56")]),
    );
    assert!(p.is_empty());
}

#[test]
fn st_plan_carries_the_coarse_and_fine_stages() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::And(vec![
            Filter::bbox("geom", 0.0, 0.0, 30.0, 30.0),
            during("dtg", date(2012, 1, 1), date(2012, 3, 31)),
            text_eq("attr1", "val56"),
        ]),
    );

    assert_eq!(p.strategy, StrategyTag::StIdx);
    assert!(!p.ranges.is_empty());
    // Month buckets for the three-month interval.
    assert_eq!(p.column_families.len(), 3);

    let coarse = stage(&p, BAND_COARSE_INDEX);
    assert_eq!(coarse.class_name, iters::ST_INTERSECT);
    let polygon = filter::parse_polygon_wkt(&coarse.options[opts::ST_FILTER]).unwrap();
    let (min, max) = filter::polygon_bounds(&polygon);
    assert_eq!((min.x, min.y, max.x, max.y), (0.0, 0.0, 30.0, 30.0));
    assert_eq!(
        coarse.options[opts::INTERVAL],
        format!(
            "{}/{}",
            date(2012, 1, 1).timestamp_millis(),
            date(2012, 3, 31).timestamp_millis()
        )
    );

    // The unextracted attribute conjunct rides down as ECQL.
    let fine = stage(&p, BAND_FINE_FILTER);
    assert_eq!(fine.options[opts::ECQL_FILTER], "attr1 = 'val56'");
    assert_eq!(fine.options[opts::FEATURE_ENCODING], FEATURE_ENCODING_NAME);
}

#[test]
fn within_rides_the_fine_filter_not_the_coarse_stage() {
    let schema = sample_schema();
    let p = plan(
        &schema,
        Filter::Spatial {
            op: SpatialOp::Within,
            property: "geom".into(),
            geometry: filter::rect_polygon(45.0, 23.0, 48.0, 27.0),
        },
    );

    assert_eq!(p.strategy, StrategyTag::StIdx);
    let coarse = stage(&p, BAND_COARSE_INDEX);
    assert!(!coarse.options.contains_key(opts::ST_FILTER));
    let fine = stage(&p, BAND_FINE_FILTER);
    assert!(fine.options[opts::ECQL_FILTER].starts_with("WITHIN(geom"));
}

#[test]
fn stage_names_are_unique_and_deterministic() {
    let schema = sample_schema();
    let f = Filter::And(vec![
        Filter::bbox("geom", 0.0, -40.0, 80.0, 40.0),
        during("dtg", date(2012, 1, 1), date(2012, 3, 31)),
    ]);
    let first = plan(&schema, f.clone());
    let second = plan(&schema, f);

    let names: Vec<&str> = first.iterators.iter().map(|s| s.name.as_str()).collect();
    let mut deduped = names.clone();
    deduped.dedup();
    assert_eq!(names, deduped);
    assert_eq!(
        names,
        second.iterators.iter().map(|s| s.name.as_str()).collect::<Vec<_>>()
    );
    // The split cell set puts a row-regex prefilter in band zero.
    assert_eq!(stage(&first, BAND_ROW_REGEX).class_name, iters::ROW_REGEX);
}

#[test]
fn density_requires_width_and_height() {
    let schema = sample_schema();
    let hints = QueryHints::builder()
        .density(DensityHints::builder().width(256).build())
        .build();
    let err = QueryPlanner::new(&schema)
        .plan(Filter::bbox("geom", 0.0, 0.0, 10.0, 10.0), &hints)
        .unwrap_err();
    assert!(matches!(err, GtError::Config(_)));
}

#[test]
fn density_overrides_projection() {
    let schema = sample_schema();
    let hints = QueryHints::builder()
        .transforms(vec!["geom=geom".to_string()])
        .density(DensityHints::builder().width(256).height(128).build())
        .build();
    let p = QueryPlanner::new(&schema)
        .plan(Filter::bbox("geom", 0.0, 0.0, 10.0, 10.0), &hints)
        .unwrap();

    let density = stage(&p, BAND_AGGREGATION);
    assert_eq!(density.class_name, iters::DENSITY);
    assert_eq!(density.options[opts::WIDTH], "256");
    assert_eq!(density.options[opts::HEIGHT], "128");
    assert!(density.options[opts::POLYGON].starts_with("POLYGON"));
    // Density composes its own output schema; projection is dropped.
    assert!(!stage(&p, BAND_FINE_FILTER).options.contains_key(opts::TRANSFORMS));
}

#[test]
fn transforms_reach_the_fine_filter_without_density() {
    let schema = sample_schema();
    let transform_schema =
        Schema::parse("observations_proj", "geom:Point:default=true").unwrap();
    let hints = QueryHints::builder()
        .transforms(vec!["geom=geom".to_string()])
        .transform_schema(transform_schema.clone())
        .build();
    let p = QueryPlanner::new(&schema)
        .plan(Filter::bbox("geom", 0.0, 0.0, 10.0, 10.0), &hints)
        .unwrap();

    let fine = stage(&p, BAND_FINE_FILTER);
    assert_eq!(fine.options[opts::TRANSFORMS], "geom=geom");
    assert_eq!(fine.options[opts::TRANSFORM_SCHEMA], transform_schema.encoded());
}

#[test]
fn temporal_density_requires_buckets() {
    let schema = sample_schema();
    let hints = QueryHints::builder()
        .temporal_density(TemporalDensityHints::builder().build())
        .build();
    let err = QueryPlanner::new(&schema)
        .plan(Filter::bbox("geom", 0.0, 0.0, 10.0, 10.0), &hints)
        .unwrap_err();
    assert!(matches!(err, GtError::Config(_)));

    let hints = QueryHints::builder()
        .temporal_density(TemporalDensityHints::builder().buckets(24).build())
        .build();
    let p = QueryPlanner::new(&schema)
        .plan(
            Filter::And(vec![
                Filter::bbox("geom", 0.0, 0.0, 10.0, 10.0),
                during("dtg", date(2012, 1, 1), date(2012, 2, 1)),
            ]),
            &hints,
        )
        .unwrap();
    let agg = stage(&p, BAND_AGGREGATION);
    assert_eq!(agg.class_name, iters::TEMPORAL_DENSITY);
    assert_eq!(agg.options[opts::BUCKETS], "24");
}

#[test]
fn cardinality_oracle_defaults_to_unknown() {
    let schema = sample_schema();
    assert_eq!(cardinality(&schema, "high"), Cardinality::High);
    assert_eq!(cardinality(&schema, "low"), Cardinality::Low);
    assert_eq!(cardinality(&schema, "attr2"), Cardinality::Unknown);
    assert_eq!(cardinality(&schema, "no_such"), Cardinality::Unknown);
}

#[test]
fn explain_lists_stages_in_band_order() {
    let schema = sample_schema();
    let p = plan(&schema, text_eq("attr2", "val56"));
    let text = explain_plan(&p);
    assert!(text.starts_with("AttrEq ranges=1"));
    assert!(text.contains(iters::ATTR_INDEX));
    assert!(text.contains(iters::FINE_FILTER));
}

proptest! {
    // Reordering the conjuncts of a top-level AND never changes the
    // strategy.
    #[test]
    fn strategy_is_invariant_under_conjunct_order(
        ordered in Just(vec![0usize, 1, 2, 3]).prop_shuffle()
    ) {
        let schema = sample_schema();
        let pool = [
            Filter::bbox("geom", -10.0, -10.0, 10.0, 10.0),
            text_eq("high", "x"),
            text_eq("low", "y"),
            text_eq("attr1", "z"),
        ];
        let conjuncts: Vec<Filter> = ordered.iter().map(|&i| pool[i].clone()).collect();
        let tag = choose_strategy(
            &schema,
            &Filter::And(conjuncts),
            &QueryHints::default(),
            INDEX_VERSION,
        );
        prop_assert_eq!(tag, StrategyTag::AttrEq);
    }

    // Id dominance holds under any order and any extra conjunct.
    #[test]
    fn id_dominance_is_order_independent(
        ordered in Just(vec![0usize, 1, 2]).prop_shuffle()
    ) {
        let schema = sample_schema();
        let pool = [
            Filter::id_in(["f1", "f2"]),
            Filter::bbox("geom", -10.0, -10.0, 10.0, 10.0),
            text_eq("high", "x"),
        ];
        let conjuncts: Vec<Filter> = ordered.iter().map(|&i| pool[i].clone()).collect();
        let tag = choose_strategy(
            &schema,
            &Filter::And(conjuncts),
            &QueryHints::default(),
            INDEX_VERSION,
        );
        prop_assert_eq!(tag, StrategyTag::RecordId);
    }
}
